// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use chatstream::chat::{self, ChatError, MemoryStore, StoreObserver, CURSOR, NEW_CHAT};
use chatstream::config::{self, ModelConfig};
use chatstream::driver::{CompletionStreamDriver, StreamObserver};
use chatstream::message::Role;
use chatstream::stream::{SessionState, StreamError};
use chatstream::transport::{CompletionRequest, CompletionTransport, ReqwestTransport};

#[derive(Parser)]
#[command(name = "chatstream", about = "Stream chat completions in the terminal")]
struct Cli {
    /// Path to the chatstream.yaml config file
    #[arg(long, default_value = "chatstream.yaml", env = "CHATSTREAM_CONFIG")]
    config: String,

    /// Model name from the config (defaults to default_model)
    #[arg(long, env = "CHATSTREAM_MODEL")]
    model: Option<String>,

    /// Override the configured system prompt
    #[arg(long)]
    system: Option<String>,

    /// Send a single prompt and exit. Without it, read prompts from stdin.
    prompt: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let source = config::FileSource::new(&cli.config);
    let config = match config::load_config(&source) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to load config: {e}");
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let model = match config.model(cli.model.as_deref()) {
        Ok(m) => m.clone(),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        model = %model.name,
        api_model = %model.api_model,
        config_hash = %config.config_hash,
        "config loaded"
    );

    let transport = Arc::new(ReqwestTransport::default());
    let repl = Repl {
        driver: CompletionStreamDriver::new(transport.clone()),
        transport,
        store: Arc::new(MemoryStore::new()),
        model,
        system_prompt: cli.system.unwrap_or(config.system_prompt),
    };
    let chat_id = repl.store.create_chat(NEW_CHAT).id;

    let ok = match cli.prompt {
        Some(prompt) => repl.turn(chat_id, &prompt).await,
        None => repl.interactive(chat_id).await,
    };

    if !ok {
        std::process::exit(1);
    }
}

struct Repl {
    driver: CompletionStreamDriver,
    transport: Arc<ReqwestTransport>,
    store: Arc<MemoryStore>,
    model: ModelConfig,
    system_prompt: String,
}

impl Repl {
    /// Read prompts line by line until EOF or Ctrl-C at the prompt.
    async fn interactive(&self, chat_id: Uuid) -> bool {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        eprintln!("model: {} (Ctrl-C cancels a reply, Ctrl-D quits)", self.model.name);

        loop {
            eprint!("> ");
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = tokio::signal::ctrl_c() => return true,
            };
            let input = match line {
                Ok(Some(line)) => line,
                Ok(None) => return true,
                Err(e) => {
                    eprintln!("error: {e}");
                    return false;
                }
            };
            let input = input.trim();
            if input.is_empty() {
                continue;
            }

            if self.turn(chat_id, input).await && self.untitled(chat_id) {
                match chat::describe_chat(
                    self.transport.as_ref() as &dyn CompletionTransport,
                    &self.model,
                    &self.system_prompt,
                    &self.store,
                    chat_id,
                )
                .await
                {
                    Ok(title) => eprintln!("[{title}]"),
                    Err(e) => tracing::warn!(error = %e, "chat title request failed"),
                }
            }
        }
    }

    fn untitled(&self, chat_id: Uuid) -> bool {
        self.store
            .chat(chat_id)
            .is_some_and(|c| c.description == NEW_CHAT)
    }

    /// Stream one reply. Returns true if it completed.
    async fn turn(&self, chat_id: Uuid, input: &str) -> bool {
        match self.stream_reply(chat_id, input).await {
            Ok(SessionState::Completed) => true,
            Ok(SessionState::Cancelled) => {
                eprintln!("\n[cancelled]");
                false
            }
            Ok(_) => false,
            Err(e) => {
                eprintln!("error: {e}");
                false
            }
        }
    }

    async fn stream_reply(&self, chat_id: Uuid, input: &str) -> Result<SessionState, ChatError> {
        let history = self.store.messages_for(chat_id);
        let messages = chat::build_prompt(&self.system_prompt, &history, input);

        self.store.add_message(chat_id, Role::User, input)?;
        let reply = self.store.add_message(chat_id, Role::Assistant, CURSOR)?;

        let observer = Arc::new(TerminalObserver::new(
            StoreObserver::new(self.store.clone(), chat_id, reply.id),
            Box::new(std::io::stdout()),
        ));
        let handle = self.driver.spawn(
            CompletionRequest::new(&self.model, messages),
            observer.clone(),
        );

        let cancel = handle.cancellation_token();
        let wait = handle.wait();
        tokio::pin!(wait);

        let joined = tokio::select! {
            joined = &mut wait => joined,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                wait.await
            }
        };

        let state = joined
            .map_err(|e| ChatError::Completion(StreamError::transport(format!("session task failed: {e}"))))?;
        if let Some(err) = observer.store.last_error() {
            eprintln!("\nerror: {err}");
        }
        Ok(state)
    }
}

/// Prints new text as it arrives and persists drafts.
struct TerminalObserver {
    store: StoreObserver,
    out: Mutex<Box<dyn Write + Send>>,
    /// Bytes of the draft already written to `out`.
    printed: AtomicUsize,
    write_failed: AtomicBool,
}

impl TerminalObserver {
    fn new(store: StoreObserver, out: Box<dyn Write + Send>) -> Self {
        Self {
            store,
            out: Mutex::new(out),
            printed: AtomicUsize::new(0),
            write_failed: AtomicBool::new(false),
        }
    }

    fn print(&self, content: &str, is_final: bool) -> std::io::Result<()> {
        let from = self.printed.swap(content.len(), Ordering::SeqCst);
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tail) = content.get(from..) {
            out.write_all(tail.as_bytes())?;
        }
        if is_final {
            out.write_all(b"\n")?;
        }
        out.flush()
    }
}

impl StreamObserver for TerminalObserver {
    fn on_start(&self) {
        self.store.on_start();
    }

    fn on_content(&self, content: &str, is_final: bool) {
        // The reply is still stored when the terminal is gone.
        if !self.write_failed.load(Ordering::SeqCst) {
            if let Err(err) = self.print(content, is_final) {
                self.write_failed.store(true, Ordering::SeqCst);
                tracing::warn!(error = %err, "cannot write reply to stdout");
            }
        }
        self.store.on_content(content, is_final);
    }

    fn on_error(&self, error: &StreamError) {
        self.store.on_error(error);
    }

    fn on_done(&self) {
        self.store.on_done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    /// Shared buffer, readable after the observer took ownership.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Fails like a closed pipe, counting attempts.
    #[derive(Clone, Default)]
    struct BrokenPipe(Arc<AtomicUsize>);

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn observer(out: Box<dyn Write + Send>) -> (Arc<MemoryStore>, Uuid, TerminalObserver) {
        let store = Arc::new(MemoryStore::new());
        let chat_id = store.create_chat(NEW_CHAT).id;
        let reply = store.add_message(chat_id, Role::Assistant, CURSOR).unwrap();
        let observer = TerminalObserver::new(StoreObserver::new(store.clone(), chat_id, reply.id), out);
        (store, reply.id, observer)
    }

    #[test]
    fn prints_only_new_text() {
        let buf = SharedBuf::default();
        let (_, _, observer) = observer(Box::new(buf.clone()));

        observer.on_content("Hel", false);
        observer.on_content("Hello", false);
        observer.on_content("Hello", true);

        assert_eq!(buf.0.lock().unwrap().as_slice(), b"Hello\n");
    }

    #[test]
    fn write_failure_is_reported_once_and_reply_still_stored() {
        let pipe = BrokenPipe::default();
        let (store, reply_id, observer) = observer(Box::new(pipe.clone()));

        observer.on_content("Hel", false);
        observer.on_content("Hello", false);
        observer.on_content("Hello", true);

        assert!(observer.write_failed.load(Ordering::SeqCst));
        assert_eq!(pipe.0.load(Ordering::SeqCst), 1);
        assert_eq!(store.message(reply_id).unwrap().content, "Hello");
    }
}
