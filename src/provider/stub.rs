use super::{ChatRequest, Delta, DeltaStream, Provider, StreamError};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// What a scripted call does.
#[derive(Debug)]
pub enum Step {
    Delta(Delta),
    /// Fail mid-stream with a read error.
    Break(String),
}

#[derive(Debug)]
pub enum Script {
    /// Refuse before any stream is produced.
    Reject(StreamError),
    /// Never answers, like a server that accepted the connection and went quiet.
    Hang,
    Stream(Vec<Step>),
}

/// In-memory provider replaying one script per call.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProvider {
    scripts: Arc<Mutex<Vec<Script>>>,
    seen: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            seen: Arc::default(),
        }
    }

    pub fn streaming(deltas: Vec<Delta>) -> Self {
        Self::new(vec![Script::Stream(
            deltas.into_iter().map(Step::Delta).collect(),
        )])
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.seen.lock().expect("lock").clone()
    }
}

impl Provider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "Scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    fn stream_chat(
        &self,
        req: ChatRequest,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<DeltaStream, StreamError>> + Send>>
    {
        self.seen.lock().expect("lock").push(req);
        let script = {
            let mut scripts = self.scripts.lock().expect("lock");
            if scripts.is_empty() {
                Script::Stream(Vec::new())
            } else {
                scripts.remove(0)
            }
        };

        Box::pin(async move {
            let steps = match script {
                Script::Reject(e) => return Err(e),
                Script::Hang => std::future::pending().await,
                Script::Stream(steps) => steps,
            };

            let (tx, rx) = mpsc::channel::<Result<Delta, StreamError>>(32);
            tokio::spawn(async move {
                for step in steps {
                    let item = match step {
                        Step::Delta(d) => Ok(d),
                        Step::Break(msg) => Err(StreamError::StreamRead(msg)),
                    };
                    if tx.send(item).await.is_err() {
                        break;
                    }
                }
            });

            Ok(Box::pin(ReceiverStream::new(rx)) as DeltaStream)
        })
    }
}
