use std::sync::{Arc, Mutex, PoisonError};

use crate::{advisor::LlmManager, pipeline::Pipeline};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub llm_manager: LlmManager,
    pub status: Arc<Mutex<Status>>,
}

/// Contadores de búsquedas servidas desde el arranque.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub active: u32,
    pub completed: u64,
    pub failed: u64,
    /// Streams cerrados por el cliente antes del evento terminal.
    pub abandoned: u64,
    pub last_location: Option<String>,
}

/// Resultado de una búsqueda tal como lo ve el contador.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
}

/// Registra una búsqueda activa y la descuenta al soltarse, termine como
/// termine el stream.
pub struct RunGuard {
    status: Arc<Mutex<Status>>,
    outcome: Option<RunOutcome>,
}

impl RunGuard {
    pub fn start(status: Arc<Mutex<Status>>, location: &str) -> Self {
        {
            let mut s = status.lock().unwrap_or_else(PoisonError::into_inner);
            s.active += 1;
            s.last_location = Some(location.to_string());
        }
        Self { status, outcome: None }
    }

    pub fn finish(&mut self, outcome: RunOutcome) {
        self.outcome = Some(outcome);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut s = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        s.active = s.active.saturating_sub(1);
        match self.outcome {
            Some(RunOutcome::Completed) => s.completed += 1,
            Some(RunOutcome::Failed) => s.failed += 1,
            None => s.abandoned += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_counts_each_outcome() {
        let status = Arc::new(Mutex::new(Status::default()));

        let mut ok = RunGuard::start(status.clone(), "Pune");
        assert_eq!(status.lock().unwrap().active, 1);
        ok.finish(RunOutcome::Completed);
        drop(ok);

        let mut failed = RunGuard::start(status.clone(), "Atlantis");
        failed.finish(RunOutcome::Failed);
        drop(failed);

        drop(RunGuard::start(status.clone(), "Shimla"));

        let s = status.lock().unwrap();
        assert_eq!(s.active, 0);
        assert_eq!((s.completed, s.failed, s.abandoned), (1, 1, 1));
        assert_eq!(s.last_location.as_deref(), Some("Shimla"));
    }
}
