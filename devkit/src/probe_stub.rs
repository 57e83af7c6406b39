/*!
Scripted prober for development without network access

Each address replays a queue of answers; once the queue is drained the last
answer sticks. Unknown addresses answer with the default outcome (offline).
*/

use async_trait::async_trait;
use devicecheck::{ProbeOutcome, Prober};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One scripted answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scripted {
    Online,
    Offline,
    /// Panics inside the probe, as a broken transport would.
    Panic,
}

impl From<ProbeOutcome> for Scripted {
    fn from(outcome: ProbeOutcome) -> Self {
        match outcome {
            ProbeOutcome::Online => Scripted::Online,
            ProbeOutcome::Offline => Scripted::Offline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeCall {
    pub address: String,
    /// "port" or "ping"
    pub method: &'static str,
    pub port: Option<u16>,
}

type ProbeHook = Arc<dyn Fn(&ProbeCall) + Send + Sync>;

#[derive(Default)]
struct Script {
    queue: VecDeque<Scripted>,
    last: Option<Scripted>,
}

#[derive(Clone)]
pub struct ScriptedProber {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    calls: Arc<Mutex<Vec<ProbeCall>>>,
    default: Arc<Mutex<Scripted>>,
    on_probe: Arc<Mutex<Option<ProbeHook>>>,
}

impl Default for ScriptedProber {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            default: Arc::new(Mutex::new(Scripted::Offline)),
            on_probe: Arc::new(Mutex::new(None)),
        }
    }

    /// Answer for addresses without a script.
    pub fn set_default(&self, answer: Scripted) {
        *self.default.lock() = answer;
    }

    /// Replaces the script of `address` with a single sticky answer.
    pub fn set(&self, address: &str, answer: Scripted) {
        self.scripts.lock().insert(
            address.to_string(),
            Script {
                queue: VecDeque::new(),
                last: Some(answer),
            },
        );
    }

    /// Appends answers to the script of `address`.
    pub fn script(&self, address: &str, answers: &[Scripted]) {
        let mut scripts = self.scripts.lock();
        let script = scripts.entry(address.to_string()).or_default();
        script.queue.extend(answers.iter().copied());
    }

    /// Called before every probe answer, e.g. to raise a stop mid-cycle.
    pub fn on_probe<F>(&self, hook: F)
    where
        F: Fn(&ProbeCall) + Send + Sync + 'static,
    {
        *self.on_probe.lock() = Some(Arc::new(hook));
    }

    pub fn calls(&self) -> Vec<ProbeCall> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, address: &str) -> usize {
        self.calls.lock().iter().filter(|call| call.address == address).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn answer(&self, call: ProbeCall) -> ProbeOutcome {
        let answer = {
            let mut scripts = self.scripts.lock();
            match scripts.get_mut(&call.address) {
                Some(script) => match script.queue.pop_front() {
                    Some(next) => {
                        script.last = Some(next);
                        next
                    }
                    None => script.last.unwrap_or(*self.default.lock()),
                },
                None => *self.default.lock(),
            }
        };

        let hook = self.on_probe.lock().clone();
        if let Some(hook) = hook {
            hook(&call);
        }
        debug!("[MOCK] {} probe of {} -> {:?}", call.method, call.address, answer);
        self.calls.lock().push(call);

        match answer {
            Scripted::Online => ProbeOutcome::Online,
            Scripted::Offline => ProbeOutcome::Offline,
            Scripted::Panic => panic!("scripted probe failure"),
        }
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe_port(&self, address: &str, port: u16, _timeout: Duration) -> ProbeOutcome {
        self.answer(ProbeCall {
            address: address.to_string(),
            method: "port",
            port: Some(port),
        })
    }

    async fn probe_ping(&self, address: &str, _timeout: Duration) -> ProbeOutcome {
        self.answer(ProbeCall {
            address: address.to_string(),
            method: "ping",
            port: None,
        })
    }
}
