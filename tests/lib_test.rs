//! Library integration tests.

use tagflow::TagflowError;

#[test]
fn error_types_are_public() {
    let err = TagflowError::DuplicateStep {
        name: "test".into(),
    };
    assert!(err.to_string().contains("test"));
}

#[test]
fn result_type_alias_is_public() {
    fn test_fn() -> tagflow::Result<()> {
        Ok(())
    }
    assert!(test_fn().is_ok());
}

#[test]
fn cli_types_are_public() {
    use clap::Parser;
    use tagflow::cli::{Cli, Commands};

    let cli = Cli::parse_from(["tagflow", "graph", "-c", "pipeline.yml"]);
    if let Commands::Graph(args) = cli.command {
        assert_eq!(args.config, std::path::PathBuf::from("pipeline.yml"));
    } else {
        panic!("Expected Graph command");
    }
}
