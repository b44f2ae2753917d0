//! Scripted classifier for tests.

use super::oracle::{Classifier, ClassifierError, ClassifierResult};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    Reject,
    Fail,
}

/// Classifier returning a fixed verdict and recording every call
#[derive(Clone)]
pub struct ScriptedClassifier {
    state: Arc<Mutex<ScriptState>>,
}

struct ScriptState {
    verdict: Verdict,
    delay: Option<Duration>,
    calls: Vec<String>,
}

impl ScriptedClassifier {
    pub fn new(verdict: Verdict) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                verdict,
                delay: None,
                calls: Vec::new(),
            })),
        }
    }

    pub fn set_verdict(&self, verdict: Verdict) {
        self.state.lock().unwrap().verdict = verdict;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, text: &str) -> ClassifierResult<bool> {
        let (verdict, delay) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(text.to_string());
            (state.verdict, state.delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match verdict {
            Verdict::Approve => Ok(true),
            Verdict::Reject => Ok(false),
            Verdict::Fail => Err(ClassifierError::Malformed("scripted failure".to_string())),
        }
    }
}
