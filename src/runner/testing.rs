//! Scriptable steps for scheduler tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::api::{provider, ParameterMap, StepLink};
use crate::error::{Result, TagflowError};
use crate::steps::{InputDefinition, Step};

/// Shared log of step start and finish events.
#[derive(Debug, Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    /// Whether `producer` finished before `consumer` started.
    pub fn finished_before_started(&self, producer: &str, consumer: &str) -> bool {
        match (
            self.position(&format!("finish:{}", producer)),
            self.position(&format!("start:{}", consumer)),
        ) {
            (Some(finish), Some(start)) => finish < start,
            _ => false,
        }
    }

    pub fn started(&self, name: &str) -> bool {
        self.position(&format!("start:{}", name)).is_some()
    }

    /// Highest number of steps observed running at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn start(&self, name: &str) {
        self.events.lock().unwrap().push(format!("start:{}", name));
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn finish(&self, name: &str) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.events.lock().unwrap().push(format!("finish:{}", name));
    }
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// A step whose links, outcome and timing are set by the test.
pub struct FakeStep {
    name: String,
    requires: Vec<StepLink>,
    creates: Vec<StepLink>,
    done: bool,
    fail: bool,
    delay: Duration,
    params: Vec<(String, String)>,
    recorder: Arc<Recorder>,
    on_run: Option<Hook>,
}

impl FakeStep {
    pub fn new(name: &str, recorder: &Arc<Recorder>) -> Self {
        Self {
            name: name.to_string(),
            requires: Vec::new(),
            creates: vec![StepLink::internal_image(name)],
            done: false,
            fail: false,
            delay: Duration::ZERO,
            params: Vec::new(),
            recorder: Arc::clone(recorder),
            on_run: None,
        }
    }

    /// Depend on the step named `other` through its default link.
    pub fn after(mut self, other: &str) -> Self {
        self.requires.push(StepLink::internal_image(other));
        self
    }

    pub fn requires(mut self, link: StepLink) -> Self {
        self.requires.push(link);
        self
    }

    pub fn creates(mut self, link: StepLink) -> Self {
        self.creates.push(link);
        self
    }

    pub fn already_done(mut self) -> Self {
        self.done = true;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn taking(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn providing(mut self, name: &str, value: &str) -> Self {
        self.params.push((name.to_string(), value.to_string()));
        self
    }

    pub fn on_run(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_run = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> Arc<dyn Step> {
        Arc::new(self)
    }
}

impl Step for FakeStep {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        format!("fake step {}", self.name)
    }

    fn requires(&self) -> Vec<StepLink> {
        self.requires.clone()
    }

    fn creates(&self) -> Vec<StepLink> {
        self.creates.clone()
    }

    fn provides(&self) -> (ParameterMap, Option<StepLink>) {
        if self.params.is_empty() {
            return (ParameterMap::new(), None);
        }
        let params = self
            .params
            .iter()
            .map(|(name, value)| {
                let value = value.clone();
                (name.clone(), provider(move || Ok(value.clone())))
            })
            .collect();
        (params, Some(StepLink::internal_image(&self.name)))
    }

    fn inputs(&self, _dry_run: bool) -> Result<InputDefinition> {
        Ok(Vec::new())
    }

    fn run(&self, _dry_run: bool) -> Result<()> {
        self.recorder.start(&self.name);
        if let Some(hook) = &self.on_run {
            hook();
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.recorder.finish(&self.name);
        if self.fail {
            return Err(TagflowError::Other(anyhow::anyhow!("{} exploded", self.name)));
        }
        Ok(())
    }

    fn done(&self) -> Result<bool> {
        Ok(self.done)
    }
}
