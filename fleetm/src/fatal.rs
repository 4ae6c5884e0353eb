use log;

/*
 * FatalHandler ends the process. The orchestrator restarts the pod and the
 * caches rebuild their state from a fresh list, which is the only recovery
 * we have for a broken watch.
 *
 * Callers must treat terminate() as if it never returns.
 */
pub trait FatalHandler: Send + Sync {
    fn terminate(&self, code: i32);
}

pub struct ProcessExit;

impl FatalHandler for ProcessExit {
    fn terminate(&self, code: i32) {
	log::error!("Terminating with exit code {}", code);
	std::process::exit(code);
    }
}

#[cfg(test)]
pub mod testing {
    use super::FatalHandler;
    use std::sync::Mutex;

    /* Records exit codes instead of exiting */
    #[derive(Default)]
    pub struct RecordingFatal {
	codes: Mutex<Vec<i32>>,
    }

    impl RecordingFatal {
	pub fn codes(&self) -> Vec<i32> {
	    self.codes.lock().unwrap().clone()
	}

	pub fn invoked(&self) -> bool {
	    !self.codes().is_empty()
	}
    }

    impl FatalHandler for RecordingFatal {
	fn terminate(&self, code: i32) {
	    self.codes.lock().unwrap().push(code);
	}
    }
}
