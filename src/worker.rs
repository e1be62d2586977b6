use crate::translator::{Translate, Translation};
use crossbeam_channel::Sender;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use tracing::{error, info};

/// Messages from a worker, in the order they were produced. Exactly one of
/// `Finished`/`Failed` ends every request.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Progress(String),
    Finished(Translation),
    Failed(String),
}

impl WorkerEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerEvent::Progress(_))
    }
}

/// Runs one streaming translation on its own thread. The thread exits after
/// the terminal event; it is never reused.
pub fn spawn(
    translator: Box<dyn Translate>,
    text: String,
    events: Sender<WorkerEvent>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("translator".into())
        .spawn(move || run(translator.as_ref(), &text, &events))
}

fn run(translator: &dyn Translate, text: &str, events: &Sender<WorkerEvent>) {
    let mode = translator.mode();
    info!("worker: {} request, {} chars", mode, text.chars().count());

    let mut last_len = 0;
    // A panicking translator still has to end the request.
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        translator.translate_stream(text, &mut |partial: &str| {
            if partial.len() > last_len {
                last_len = partial.len();
                let _ = events.send(WorkerEvent::Progress(partial.to_string()));
            }
        })
    }));

    let terminal = match result {
        Ok(Ok(translation)) => {
            info!("worker: {} finished", mode);
            WorkerEvent::Finished(translation)
        }
        Ok(Err(e)) => {
            error!("worker: {} failed: {}", mode, e);
            WorkerEvent::Failed(e.to_string())
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            error!("worker: {} panicked: {}", mode, msg);
            WorkerEvent::Failed(format!("worker panicked: {}", msg))
        }
    };
    if events.send(terminal).is_err() {
        info!("worker: receiver gone, result dropped");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TranslateError;
    use crate::translator::{Mode, Usage};
    use crossbeam_channel::unbounded;

    /// Emits the given chunks, then either succeeds, fails or panics.
    struct Scripted {
        chunks: Vec<&'static str>,
        fail: Option<&'static str>,
        panic: bool,
    }

    impl Translate for Scripted {
        fn mode(&self) -> Mode {
            Mode::ToChinese
        }

        fn translate(&self, text: &str) -> Result<Translation, TranslateError> {
            self.translate_stream(text, &mut |_| {})
        }

        fn translate_stream(
            &self,
            text: &str,
            on_chunk: &mut dyn FnMut(&str),
        ) -> Result<Translation, TranslateError> {
            let mut acc = String::new();
            for c in &self.chunks {
                acc.push_str(c);
                on_chunk(&acc);
            }
            if self.panic {
                panic!("decoder state corrupted");
            }
            if let Some(msg) = self.fail {
                return Err(TranslateError::Network(msg.to_string()));
            }
            Ok(Translation {
                original: text.to_string(),
                translated: acc,
                mode: Mode::ToChinese,
                usage: Usage::default(),
            })
        }
    }

    fn collect(t: Scripted, text: &str) -> Vec<WorkerEvent> {
        let (tx, rx) = unbounded();
        spawn(Box::new(t), text.to_string(), tx).unwrap().join().unwrap();
        rx.try_iter().collect()
    }

    #[test]
    fn progress_precedes_single_terminal() {
        let events = collect(
            Scripted {
                chunks: vec!["你", "", "好"],
                fail: None,
                panic: false,
            },
            "Hello",
        );

        assert_eq!(events.len(), 3);
        assert_eq!(events[0], WorkerEvent::Progress("你".into()));
        assert_eq!(events[1], WorkerEvent::Progress("你好".into()));
        match &events[2] {
            WorkerEvent::Finished(t) => {
                assert_eq!(t.original, "Hello");
                assert_eq!(t.translated, "你好");
                assert_eq!(t.mode, Mode::ToChinese);
            }
            other => panic!("unexpected terminal {:?}", other),
        }
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[test]
    fn progress_lengths_never_decrease() {
        let events = collect(
            Scripted {
                chunks: vec!["a", "bc", "", "def"],
                fail: None,
                panic: false,
            },
            "x",
        );
        let lens: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Progress(s) => Some(s.len()),
                _ => None,
            })
            .collect();
        assert!(lens.windows(2).all(|w| w[0] <= w[1]));
        assert!(events.last().unwrap().is_terminal());
    }

    #[test]
    fn failure_mid_stream_is_not_promoted() {
        let events = collect(
            Scripted {
                chunks: vec!["partial"],
                fail: Some("connection reset"),
                panic: false,
            },
            "Hello",
        );

        assert_eq!(
            events,
            vec![
                WorkerEvent::Progress("partial".into()),
                WorkerEvent::Failed("network error: connection reset".into()),
            ]
        );
    }

    #[test]
    fn panic_becomes_failed_event() {
        let events = collect(
            Scripted {
                chunks: vec!["half"],
                fail: None,
                panic: true,
            },
            "Hello",
        );

        assert_eq!(
            events,
            vec![
                WorkerEvent::Progress("half".into()),
                WorkerEvent::Failed("worker panicked: decoder state corrupted".into()),
            ]
        );
    }
}
