//! Module discovery
//!
//! Modules come either from an explicit list or stream in from a build process
//! that reports them over a discovery channel while it is still running.

use super::OrchestratorError;
use crate::ipc::{
    ChannelName, Connection, IpcError, IpcServer, Message, ProtocolError, ServerStream,
};
use crate::models::{exit_code, Handshake, HandshakeProperty, Module};
use crate::supervisor::DEFAULT_DRAIN_TIMEOUT;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Environment variable carrying the discovery channel name to the build process
pub const DISCOVERY_PIPE_ENV: &str = "TESTMUX_DISCOVERY_PIPE";

/// Where test modules come from
#[derive(Clone, Debug)]
pub enum ModuleSource {
    Explicit(Vec<Module>),
    Build(BuildCommand),
}

/// External build that reports modules while it runs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub working_directory: Option<PathBuf>,
    pub environment: BTreeMap<String, String>,
}

impl BuildCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_directory: None,
            environment: BTreeMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    fn to_command(&self, channel: &ChannelName) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&self.environment)
            .env(DISCOVERY_PIPE_ENV, channel.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_directory {
            command.current_dir(dir);
        }
        command
    }
}

/// Run the build, handing every reported module to `admit` as it arrives
///
/// Returns the build's exit code once the build has exited and every module it
/// reported has been admitted, or `None` when `interrupt` fired first. Either an
/// `admit` error or `interrupt` kills the build.
pub(super) async fn stream_modules<F>(
    build: &BuildCommand,
    channel: ChannelName,
    interrupt: &CancellationToken,
    mut admit: F,
) -> Result<Option<i32>, OrchestratorError>
where
    F: FnMut(Module) -> Result<(), OrchestratorError>,
{
    let server = IpcServer::bind(channel).map_err(OrchestratorError::DiscoveryChannel)?;
    let name = server.name().clone();

    let (sender, mut modules) = mpsc::unbounded_channel();
    let stop = CancellationToken::new();
    let _stop_on_return = stop.clone().drop_guard();
    let accept_task = tokio::spawn(accept_modules(server, sender, stop.clone()));

    let mut command = build.to_command(&name);
    info!(channel = %name, "starting build {}", build.program.to_string_lossy());
    let mut child = command
        .spawn()
        .map_err(|source| OrchestratorError::BuildLaunch {
            program: build.program.to_string_lossy().into_owned(),
            source,
        })?;

    let status = {
        let wait = child.wait();
        tokio::pin!(wait);
        loop {
            tokio::select! {
                status = &mut wait => break status,
                Some(module) = modules.recv() => admit(module)?,
                _ = interrupt.cancelled() => {
                    warn!("discovery interrupted, stopping build");
                    return Ok(None);
                }
            }
        }
    };

    let code = match status {
        Ok(status) => status.code().unwrap_or(-1),
        Err(e) => {
            warn!("Failed to wait for build: {e}");
            exit_code::GENERIC_FAILURE
        }
    };
    debug!(code, "build exited");

    stop.cancel();
    if let Err(e) = accept_task.await {
        warn!(channel = %name, "discovery loop failed: {e}");
    }
    while let Some(module) = modules.recv().await {
        if interrupt.is_cancelled() {
            return Ok(None);
        }
        admit(module)?;
    }
    Ok(Some(code))
}

async fn accept_modules(
    server: IpcServer,
    modules: mpsc::UnboundedSender<Module>,
    stop: CancellationToken,
) {
    let channel = server.name().clone();
    let mut connections = Box::pin(server.listen());
    let mut pumps = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            next = connections.next() => match next {
                Some(Ok(connection)) => {
                    let modules = modules.clone();
                    pumps.spawn(async move {
                        if let Err(e) = serve_discovery(connection, modules).await {
                            warn!("discovery connection failed: {e}");
                        }
                    });
                }
                Some(Err(e)) => {
                    warn!(channel = %channel, "accept failed: {e}");
                    break;
                }
                None => break,
            },
            _ = stop.cancelled() => break,
            Some(_) = pumps.join_next(), if !pumps.is_empty() => {}
        }
    }
    drop(connections);
    drop(modules);

    let drain = async { while pumps.join_next().await.is_some() {} };
    if tokio::time::timeout(DEFAULT_DRAIN_TIMEOUT, drain)
        .await
        .is_err()
    {
        warn!(channel = %channel, "discovery connections still open after build exit, aborting");
        pumps.shutdown().await;
    }
}

async fn serve_discovery(
    mut connection: Connection<ServerStream>,
    modules: mpsc::UnboundedSender<Module>,
) -> Result<(), IpcError> {
    let handshake = match connection.receive().await? {
        Some(Message::Handshake(handshake)) => handshake,
        Some(other) => return Err(ProtocolError::HandshakeRequired(other.kind()).into()),
        None => return Ok(()),
    };
    let Some(version) = handshake.negotiate() else {
        connection.send(&Message::Handshake(Handshake::reply(""))).await?;
        let offered = handshake
            .get(HandshakeProperty::SupportedProtocolVersions)
            .unwrap_or_default()
            .to_string();
        return Err(ProtocolError::UnsupportedVersion(offered).into());
    };
    connection.send(&Message::Handshake(Handshake::reply(version))).await?;

    while let Some(message) = connection.receive().await? {
        match message {
            Message::Module(module) => {
                debug!(module = %module, "module discovered");
                // Receiver is gone only when discovery was aborted
                let _ = modules.send(module);
            }
            other => trace!(kind = other.kind(), "ignoring discovery message"),
        }
        connection.send(&Message::Void).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_build_command_builder() {
        let build = BuildCommand::new("dotnet")
            .with_args(["build", "-tl:off"])
            .with_working_directory("/src")
            .with_env("CONFIGURATION", "Release");
        assert_eq!(build.args, vec![OsString::from("build"), OsString::from("-tl:off")]);
        assert_eq!(build.working_directory, Some(PathBuf::from("/src")));
        assert_eq!(build.environment.get("CONFIGURATION").map(String::as_str), Some("Release"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_build_launch_failure_is_fatal() {
        let build = BuildCommand::new("/definitely/not/a/build/tool");
        let interrupt = CancellationToken::new();
        let result = stream_modules(&build, ChannelName::random(), &interrupt, |_| Ok(())).await;
        assert!(matches!(result, Err(OrchestratorError::BuildLaunch { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_build_without_modules_reports_exit_code() {
        let build = BuildCommand::new("/bin/sh").with_args(["-c", "exit 4"]);
        let mut admitted = 0;
        let interrupt = CancellationToken::new();
        let code = stream_modules(&build, ChannelName::random(), &interrupt, |_| {
            admitted += 1;
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(code, Some(4));
        assert_eq!(admitted, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_interrupt_stops_running_build() {
        let build = BuildCommand::new("/bin/sh").with_args(["-c", "sleep 30"]);
        let interrupt = CancellationToken::new();
        let trigger = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            stream_modules(&build, ChannelName::random(), &interrupt, |_| Ok(())),
        )
        .await
        .expect("discovery should stop once interrupted");
        assert_eq!(result.unwrap(), None);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
