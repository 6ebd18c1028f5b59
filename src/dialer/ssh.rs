//! Tunnels through an SSH server using the system `ssh` client.
//!
//! Each dial runs `ssh -W target:port` and uses the child's stdio as the
//! stream. Authentication is whatever the client is configured for (keys,
//! agent); `BatchMode` keeps it from prompting on the proxy's terminal.

use super::{BoxedStream, Dialer, Network, ProxyAuth, ProxyStream, split_host_port};
use crate::error::{DialError, DialResult};
use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// Client binary invoked per tunnel
pub const SSH_PROGRAM: &str = "ssh";

#[derive(Debug, Clone)]
pub struct SshDialer {
    network: Network,
    host: String,
    port: u16,
    user: Option<String>,
    program: String,
}

pub fn ssh(network: Network, proxy: &str, auth: Option<ProxyAuth>) -> DialResult<SshDialer> {
    let (host, port) = split_host_port(proxy)?;
    let user = match auth {
        Some(auth) => {
            if !auth.password.is_empty() {
                warn!(
                    proxy = %proxy,
                    "SSH proxy password is ignored; configure a key or agent instead"
                );
            }
            Some(auth.user).filter(|u| !u.is_empty())
        }
        None => None,
    };
    Ok(SshDialer {
        network,
        host,
        port,
        user,
        program: SSH_PROGRAM.to_string(),
    })
}

impl SshDialer {
    /// Use another client binary, e.g. a wrapper script
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Arguments passed to the client for `target`
    pub fn args(&self, target: &str) -> Vec<String> {
        let mut args = vec![
            "-W".to_string(),
            target.to_string(),
            "-p".to_string(),
            self.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ExitOnForwardFailure=yes".to_string(),
        ];
        match self.network {
            Network::Tcp4 => args.push("-4".to_string()),
            Network::Tcp6 => args.push("-6".to_string()),
            Network::Tcp => {}
        }
        let destination = match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        };
        args.push(destination);
        args
    }
}

#[async_trait]
impl Dialer for SshDialer {
    async fn dial(&self, _network: Network, addr: &str) -> DialResult<BoxedStream> {
        split_host_port(addr)?;
        let proxy = format!("{}:{}", self.host, self.port);
        let mut child = Command::new(&self.program)
            .args(self.args(addr))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DialError::Tunnel {
                proxy: proxy.clone(),
                reason: format!("failed to spawn {}: {}", self.program, e),
            })?;

        let missing = |what: &str| DialError::Tunnel {
            proxy: proxy.clone(),
            reason: format!("{} not captured", what),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            let proxy = proxy.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(proxy = %proxy, "ssh: {}", line);
                }
            });
        }

        debug!(proxy = %proxy, target = %addr, "SSH tunnel started");
        Ok(Box::new(SshChannel {
            _child: child,
            stdin: Some(stdin),
            stdout,
        }))
    }
}

/// Byte stream over the stdio of an `ssh -W` child
#[derive(Debug)]
pub struct SshChannel {
    _child: Child,
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
}

impl AsyncRead for SshChannel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for SshChannel {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().stdin.as_mut() {
            Some(stdin) => Pin::new(stdin).poll_write(cx, buf),
            None => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().stdin.as_mut() {
            Some(stdin) => Pin::new(stdin).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    // Closing stdin makes ssh send EOF on the channel
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(stdin) = this.stdin.as_mut() {
            std::task::ready!(Pin::new(stdin).poll_flush(cx))?;
        }
        this.stdin = None;
        Poll::Ready(Ok(()))
    }
}

impl ProxyStream for SshChannel {
    fn can_half_close(&self) -> bool {
        true
    }
}
