//! External message-rewrite process.
//!
//! A middleware is a long-running child process that speaks a line protocol
//! over its standard streams. For every message it receives one byte giving
//! the message type (`1` request, `2` response), the message as JSON, and a
//! newline; it answers with one line holding the (possibly rewritten) message
//! as JSON. Calls are strictly sequential.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::MiddlewareError;
use crate::message::Message;
use crate::pipeline::ErrorReporter;

/// Type byte written before a request.
pub const REQUEST_TYPE: u8 = b'1';
/// Type byte written before a response.
pub const RESPONSE_TYPE: u8 = b'2';

fn type_byte(message: &Message) -> u8 {
    match message {
        Message::Request(_) => REQUEST_TYPE,
        Message::Response(_) => RESPONSE_TYPE,
    }
}

/// A running middleware process.
pub struct Middleware {
    command: String,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    line: String,
}

impl Middleware {
    /// Start `command`, split on whitespace into program and arguments.
    pub fn spawn(command: &str) -> Result<Self, MiddlewareError> {
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or(MiddlewareError::EmptyCommand)?;

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MiddlewareError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(MiddlewareError::Exited);
        };
        debug!(command, pid = ?child.id(), "middleware started");

        Ok(Self {
            command: command.to_string(),
            child,
            stdin,
            stdout: BufReader::new(stdout),
            line: String::new(),
        })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Send one message through the process and return its answer.
    pub async fn rewrite(&mut self, message: &Message) -> Result<Message, MiddlewareError> {
        let mut frame = Vec::with_capacity(512);
        frame.push(type_byte(message));
        serde_json::to_writer(&mut frame, message)?;
        frame.push(b'\n');

        self.stdin.write_all(&frame).await?;
        self.stdin.flush().await?;

        self.line.clear();
        if self.stdout.read_line(&mut self.line).await? == 0 {
            return Err(MiddlewareError::Exited);
        }

        let reply: Message =
            serde_json::from_str(self.line.trim_end()).map_err(|e| MiddlewareError::Malformed {
                reason: e.to_string(),
            })?;
        if reply.is_request() != message.is_request() {
            return Err(MiddlewareError::Malformed {
                reason: "reply changed the message type".to_string(),
            });
        }
        Ok(reply)
    }

    /// Close the process's input and wait for it to exit.
    pub async fn shutdown(mut self) {
        drop(self.stdin);
        match self.child.wait().await {
            Ok(status) => debug!(command = %self.command, %status, "middleware exited"),
            Err(e) => warn!(command = %self.command, error = %e, "failed to wait for middleware"),
        }
    }

    /// Rewrite every message from `input` onto `output` until the input ends
    /// or `cancel` fires.
    ///
    /// A failed rewrite is reported and that message dropped.
    pub async fn filter(
        mut self,
        mut input: mpsc::Receiver<Message>,
        output: mpsc::Sender<Message>,
        errors: ErrorReporter,
        cancel: CancellationToken,
    ) {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = input.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            match self.rewrite(&message).await {
                Ok(rewritten) => {
                    if output.send(rewritten).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(key = %message.key(), error = %e, "middleware dropped message");
                    errors.report(e);
                }
            }
        }
        self.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageMeta, Request, Response};

    fn request(uri: &str) -> Message {
        Message::Request(Request {
            meta: MessageMeta::new(3, 0),
            method: "GET".into(),
            uri: uri.into(),
            version: 1,
            headers: vec![],
            body: b"payload".to_vec(),
        })
    }

    // Test 1: Process that strips the type byte echoes the message back
    #[tokio::test]
    async fn test_rewrite_passthrough() {
        let mut mw = Middleware::spawn("sed -u s/^.//").unwrap();
        let msg = request("/echo");

        let reply = mw.rewrite(&msg).await.unwrap();
        assert_eq!(reply, msg);

        let response = Message::Response(Response {
            meta: MessageMeta::new(3, 0),
            status: 200,
            reason: "OK".into(),
            version: 1,
            headers: vec![],
            body: vec![],
        });
        assert_eq!(mw.rewrite(&response).await.unwrap(), response);
        mw.shutdown().await;
    }

    // Test 2: Process can rewrite fields
    #[tokio::test]
    async fn test_rewrite_changes_message() {
        let mut mw = Middleware::spawn("sed -u -e s/^.// -e s|/old|/new|").unwrap();
        let reply = mw.rewrite(&request("/old")).await.unwrap();
        match reply {
            Message::Request(r) => assert_eq!(r.uri, "/new"),
            other => panic!("unexpected {other:?}"),
        }
        mw.shutdown().await;
    }

    // Test 3: Unparseable reply is malformed
    #[tokio::test]
    async fn test_malformed_reply() {
        // Echoes the type byte too, so the line is not JSON
        let mut mw = Middleware::spawn("sed -u s/x/x/").unwrap();
        let err = mw.rewrite(&request("/")).await.unwrap_err();
        assert!(matches!(err, MiddlewareError::Malformed { .. }));
        mw.shutdown().await;
    }

    // Test 4: Exited process is an error, not a hang
    #[tokio::test]
    async fn test_exited_process() {
        let mut mw = Middleware::spawn("true").unwrap();
        assert!(mw.rewrite(&request("/")).await.is_err());
    }

    // Test 5: Spawn failures
    #[tokio::test]
    async fn test_spawn_errors() {
        assert!(matches!(
            Middleware::spawn("   "),
            Err(MiddlewareError::EmptyCommand)
        ));
        assert!(matches!(
            Middleware::spawn("/definitely/not/a/program"),
            Err(MiddlewareError::Spawn { .. })
        ));
    }

    // Test 6: Filter reports failures and keeps going
    #[tokio::test]
    async fn test_filter_drops_failed_messages() {
        // Answers anything mentioning /drop with a line that is not JSON
        let mw = Middleware::spawn("sed -u -e s/^.// -e s|.*/drop.*|junk|").unwrap();
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (errors, mut error_rx) = ErrorReporter::channel();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(mw.filter(in_rx, out_tx, errors, cancel));
        in_tx.send(request("/keep1")).await.unwrap();
        in_tx.send(request("/drop")).await.unwrap();
        in_tx.send(request("/keep2")).await.unwrap();
        drop(in_tx);

        let mut kept = Vec::new();
        while let Some(Message::Request(r)) = out_rx.recv().await {
            kept.push(r.uri);
        }
        task.await.unwrap();

        assert_eq!(kept, ["/keep1", "/keep2"]);
        let err = error_rx.try_recv().unwrap();
        assert!(err.to_string().contains("malformed reply"));
    }
}
