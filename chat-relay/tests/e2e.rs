use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, bail};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const LINE_WAIT: Duration = Duration::from_secs(3);

/// Line-at-a-time view of a child's stdout with a per-line deadline.
struct Output(Lines<BufReader<ChildStdout>>);

impl Output {
    fn of(child: &mut Child) -> Result<Self> {
        let stdout = child.stdout.take().context("stdout was not piped")?;
        Ok(Self(BufReader::new(stdout).lines()))
    }

    async fn next(&mut self, waiting_for: &str) -> Result<String> {
        match timeout(LINE_WAIT, self.0.next_line()).await {
            Ok(Ok(Some(line))) => Ok(line),
            Ok(Ok(None)) => bail!("output ended while waiting for {waiting_for}"),
            Ok(Err(err)) => Err(err).context(format!("reading {waiting_for}")),
            Err(_) => bail!("no output line within {LINE_WAIT:?} ({waiting_for})"),
        }
    }

    async fn skip_until(&mut self, needle: &str) -> Result<String> {
        loop {
            let line = self.next(needle).await?;
            if line.contains(needle) {
                return Ok(line);
            }
        }
    }

    /// Keeps reading in the background so the child never blocks on a full pipe.
    fn discard(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { while let Ok(Some(_)) = self.0.next_line().await {} })
    }
}

struct Chatter {
    name: &'static str,
    child: Child,
    stdin: ChildStdin,
    output: Output,
}

impl Chatter {
    async fn connect(binary: &Path, name: &'static str, host: &str, port: &str) -> Result<Self> {
        let mut child = relay_command(binary, "warn")
            .args(["client", "--username", name, "--host", host, "--port", port])
            .stdin(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning client {name}"))?;
        let stdin = child.stdin.take().context("stdin was not piped")?;
        let mut output = Output::of(&mut child)?;

        let banner = output.next("connect banner").await?;
        assert_eq!(banner, format!("*** connected as {name}"));
        Ok(Self {
            name,
            child,
            stdin,
            output,
        })
    }

    async fn say(&mut self, line: &str) -> Result<()> {
        self.stdin.write_all(format!("{line}\n").as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn hears(&mut self, expected: &str) -> Result<()> {
        let line = self.output.next(expected).await?;
        assert_eq!(line, expected, "unexpected line on {}'s terminal", self.name);
        Ok(())
    }

    async fn quit(mut self, command: &str) -> Result<()> {
        self.say(command).await?;
        self.hears("*** leaving chat").await?;
        let status = self.child.wait().await?;
        if !status.success() {
            bail!("client {} exited with {status}", self.name);
        }
        Ok(())
    }
}

fn relay_command(binary: &Path, log_level: &str) -> Command {
    let mut cmd = Command::new(binary);
    cmd.env("RUST_LOG", log_level)
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    cmd
}

#[tokio::test]
async fn two_terminal_clients_chat_through_the_relay() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("chat-relay");

    let mut server = relay_command(&binary, "info")
        .args(["server", "--host", "127.0.0.1", "--port", "0"])
        .spawn()
        .context("spawning server")?;
    let mut server_log = Output::of(&mut server)?;

    let banner = server_log.skip_until("relay listening on").await?;
    let addr = banner
        .split_whitespace()
        .last()
        .context("banner without an address")?
        .to_string();
    let (host, port) = addr.rsplit_once(':').context("address without a port")?;

    let mut alice = Chatter::connect(&binary, "alice", host, port).await?;
    server_log.skip_until("user alice joined").await?;
    let mut bob = Chatter::connect(&binary, "bob", host, port).await?;
    server_log.skip_until("user bob joined").await?;
    let server_log = server_log.discard();

    alice.hears("bob> User bob has connected").await?;

    // No echo: each line only shows up on the other terminal.
    alice.say("Hello from Alice").await?;
    bob.hears("alice> Hello from Alice").await?;
    bob.say("Hi Alice!").await?;
    alice.hears("bob> Hi Alice!").await?;

    alice.quit("/exit").await?;
    bob.hears("alice> User alice has disconnected").await?;
    bob.quit("/quit").await?;

    server.kill().await?;
    let _ = server_log.await;
    Ok(())
}
