//! Test process supervisor
//!
//! Owns one host process and the channel it reports over.

use super::command::{ExecutionMode, LaunchCommand, LaunchOptions};
use super::events::{
    FailureKind, HostFailure, ProcessExit, SupervisorHandler, SupervisorId, SupervisorInfo,
};
use crate::ipc::{ChannelName, Connection, IpcError, IpcServer, Message, ProtocolError};
use crate::models::{exit_code, Handshake, HandshakeProperty, Module};
use futures::StreamExt;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Failures that abort the whole run rather than one supervisor
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to create channel for {module}: {source}")]
    Channel {
        module: String,
        #[source]
        source: IpcError,
    },
}

/// Supervises one test module's host process
pub struct TestProcessSupervisor {
    info: SupervisorInfo,
    options: Arc<LaunchOptions>,
    channel: ChannelName,
}

impl TestProcessSupervisor {
    pub fn new(module: impl Into<Arc<Module>>, options: Arc<LaunchOptions>) -> Self {
        Self {
            info: SupervisorInfo {
                id: SupervisorId::next(),
                module: module.into(),
            },
            options,
            channel: ChannelName::random(),
        }
    }

    pub fn id(&self) -> SupervisorId {
        self.info.id
    }

    pub fn module(&self) -> &Module {
        &self.info.module
    }

    pub fn info(&self) -> &SupervisorInfo {
        &self.info
    }

    pub fn channel_name(&self) -> &ChannelName {
        &self.channel
    }

    /// Launch the host, pump its channel until it exits, report the exit
    ///
    /// Returns the host's exit code. Per-module failures are reported through
    /// the handler; only channel creation failures are returned as errors.
    pub async fn run(
        &self,
        mode: ExecutionMode,
        handler: Arc<dyn SupervisorHandler>,
        cancel: &CancellationToken,
    ) -> Result<i32, SupervisorError> {
        if cancel.is_cancelled() {
            debug!(supervisor = %self.info.id, "cancelled before launch");
            return Ok(exit_code::SUCCESS);
        }

        let module = &self.info.module;
        if !module.binary_path.exists() {
            let failure = HostFailure::new(
                FailureKind::Launch,
                format!("Test module not found: {}", module.display_path()),
            );
            warn!(supervisor = %self.info.id, "{failure}");
            handler.on_error(&self.info, &failure);
            return Ok(self.report_failed_launch(&*handler));
        }

        let server =
            IpcServer::bind(self.channel.clone()).map_err(|source| SupervisorError::Channel {
                module: module.display_path(),
                source,
            })?;

        let pump = Arc::new(Pump {
            info: self.info.clone(),
            handler: handler.clone(),
            mode,
            handshake_received: AtomicBool::new(false),
        });
        let stop = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            server,
            pump.clone(),
            stop.clone(),
            self.options.drain_timeout,
        ));

        let command = LaunchCommand::build(module, &self.options, mode, &self.channel);
        debug!(supervisor = %self.info.id, mode = mode.name(), "launching {command}");

        let mut process = command.to_command();
        process
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let (code, stdout, stderr) = match process.spawn() {
            Ok(mut child) => {
                let out = child.stdout.take();
                let err = child.stderr.take();
                let (status, stdout, stderr) =
                    tokio::join!(child.wait(), collect_lines(out), collect_lines(err));
                let code = match status {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(e) => {
                        let failure = HostFailure::new(
                            FailureKind::Launch,
                            format!("Failed to wait for test host: {e}"),
                        );
                        handler.on_error(&self.info, &failure);
                        exit_code::GENERIC_FAILURE
                    }
                };
                (code, stdout, stderr)
            }
            Err(e) => {
                stop.cancel();
                let _ = accept_task.await;
                let failure = HostFailure::new(
                    FailureKind::Launch,
                    format!("Failed to start {}: {e}", command.program.to_string_lossy()),
                );
                warn!(supervisor = %self.info.id, "{failure}");
                handler.on_error(&self.info, &failure);
                return Ok(self.report_failed_launch(&*handler));
            }
        };

        debug!(supervisor = %self.info.id, code, "test host exited");
        stop.cancel();
        if let Err(e) = accept_task.await {
            warn!(supervisor = %self.info.id, "connection loop failed: {e}");
        }

        let handshake_received = pump.handshake_received.load(Ordering::Acquire);
        Ok(self.report_exit(&*handler, code, stdout, stderr, handshake_received))
    }

    fn report_failed_launch(&self, handler: &dyn SupervisorHandler) -> i32 {
        self.report_exit(
            handler,
            exit_code::GENERIC_FAILURE,
            Vec::new(),
            Vec::new(),
            false,
        )
    }

    fn report_exit(
        &self,
        handler: &dyn SupervisorHandler,
        exit_code: i32,
        stdout: Vec<String>,
        stderr: Vec<String>,
        handshake_received: bool,
    ) -> i32 {
        let exit = ProcessExit {
            exit_code,
            stdout,
            stderr,
            handshake_received,
        };
        handler.on_process_exit(&self.info, &exit);
        exit_code
    }
}

async fn collect_lines<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<String> {
    let Some(reader) = reader else {
        return Vec::new();
    };
    let mut lines = BufReader::new(reader).lines();
    let mut collected = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            collected.push(line);
        }
    }
    collected
}

/// Accept connections until stopped, then give open pumps a bounded window to finish
async fn accept_loop(
    server: IpcServer,
    pump: Arc<Pump>,
    stop: CancellationToken,
    drain_timeout: Duration,
) {
    let channel = server.name().clone();
    let mut connections = Box::pin(server.listen());
    let mut pumps = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            next = connections.next() => match next {
                Some(Ok(connection)) => {
                    let pump = pump.clone();
                    pumps.spawn(async move { pump.run(connection).await });
                }
                Some(Err(e)) => {
                    warn!(channel = %channel, "accept failed: {e}");
                    break;
                }
                None => break,
            },
            _ = stop.cancelled() => break,
            Some(joined) = pumps.join_next(), if !pumps.is_empty() => {
                if let Err(e) = joined {
                    warn!(channel = %channel, "connection pump failed: {e}");
                }
            }
        }
    }
    drop(connections);

    let drain = async { while pumps.join_next().await.is_some() {} };
    if tokio::time::timeout(drain_timeout, drain).await.is_err() {
        warn!(
            channel = %channel,
            "connections still open {}s after host exit, aborting",
            drain_timeout.as_secs()
        );
        pumps.shutdown().await;
    }
}

/// Serves every connection from one host process
struct Pump {
    info: SupervisorInfo,
    handler: Arc<dyn SupervisorHandler>,
    mode: ExecutionMode,
    handshake_received: AtomicBool,
}

impl Pump {
    async fn run<S>(&self, mut connection: Connection<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        if let Err(e) = self.serve(&mut connection).await {
            let failure = HostFailure::new(FailureKind::Protocol, e.to_string());
            warn!(supervisor = %self.info.id, "{failure}");
            self.handler.on_error(&self.info, &failure);
            let _ = connection.shutdown().await;
        }
    }

    async fn serve<S>(&self, connection: &mut Connection<S>) -> Result<(), IpcError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let handshake = match connection.receive().await? {
            Some(Message::Handshake(handshake)) => handshake,
            Some(other) => return Err(ProtocolError::HandshakeRequired(other.kind()).into()),
            None => return Ok(()),
        };
        self.negotiate(connection, &handshake).await?;

        while let Some(message) = connection.receive().await? {
            match message {
                Message::Handshake(handshake) => self.negotiate(connection, &handshake).await?,
                other => {
                    let response = self.dispatch(other);
                    connection.send(&response).await?;
                }
            }
        }
        Ok(())
    }

    /// Answer a handshake; an unsupported version ends the connection
    async fn negotiate<S>(
        &self,
        connection: &mut Connection<S>,
        handshake: &Handshake,
    ) -> Result<(), IpcError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        trace!(supervisor = %self.info.id, "handshake: {handshake}");
        match handshake.negotiate() {
            Some(version) => {
                self.handshake_received.store(true, Ordering::Release);
                self.handler.on_handshake(&self.info, handshake);
                connection.send(&Message::Handshake(Handshake::reply(version))).await?;
                Ok(())
            }
            None => {
                connection.send(&Message::Handshake(Handshake::reply(""))).await?;
                let offered = handshake
                    .get(HandshakeProperty::SupportedProtocolVersions)
                    .unwrap_or_default()
                    .to_string();
                Err(ProtocolError::UnsupportedVersion(offered).into())
            }
        }
    }

    fn dispatch(&self, message: Message) -> Message {
        let help = self.mode == ExecutionMode::Help;
        match message {
            Message::CommandLineOptions(options) => {
                self.handler.on_command_line_options(&self.info, &options)
            }
            Message::DiscoveredTests(tests) if !help => {
                self.handler.on_discovered_tests(&self.info, &tests)
            }
            Message::TestResults(results) if !help => {
                self.handler.on_test_results(&self.info, &results)
            }
            Message::FileArtifacts(artifacts) if !help => {
                self.handler.on_file_artifacts(&self.info, &artifacts)
            }
            Message::SessionEvent(event) => self.handler.on_session_event(&self.info, &event),
            Message::Error(error) => {
                let failure = HostFailure::new(FailureKind::Host, error.message);
                self.handler.on_error(&self.info, &failure);
            }
            Message::Unknown { serializer_id } => {
                trace!(supervisor = %self.info.id, serializer_id, "skipping unsupported message");
            }
            other => {
                trace!(supervisor = %self.info.id, kind = other.kind(), "ignoring message");
            }
        }
        Message::Void
    }
}
