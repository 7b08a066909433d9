// Makes sure the same log message does not clutter the log file.
//
// A message from the same caller location emitted again within a minute of the
// last occurrence is counted instead of being logged again.

use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

struct LoggerState {
    last_log_time: Option<chrono::DateTime<Utc>>,
    counter: u32,
}

pub struct LogSafe {
    states: Arc<Mutex<HashMap<String, Arc<Mutex<LoggerState>>>>>,
}

impl LogSafe {
    fn new() -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn warn(&self, msg: &str, file: &str, line: u32) {
        let file = Path::new(file)
            .file_name()
            .and_then(std::ffi::OsStr::to_str)
            .unwrap_or("unknown");
        let caller = format!("{file}:{line}");

        let state = {
            let mut states = self.states.lock().await;
            states
                .entry(caller)
                .or_insert_with(|| {
                    Arc::new(Mutex::new(LoggerState {
                        last_log_time: None,
                        counter: 0,
                    }))
                })
                .clone()
        };

        let mut state = state.lock().await;
        let now = Utc::now();
        match state.last_log_time {
            Some(last) if (now - last) < Duration::minutes(1) => {
                state.counter += 1;
            }
            _ => {
                if state.counter > 0 {
                    log::warn!("{msg} (repeated {} times)", state.counter);
                } else {
                    log::warn!("{msg}");
                }
                state.last_log_time = Some(now);
                state.counter = 0;
            }
        }
    }
}

impl Default for LogSafe {
    fn default() -> Self {
        Self::new()
    }
}

pub static LOG_SAFE: Lazy<LogSafe> = Lazy::new(LogSafe::new);
