use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn cli_chat_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("datagram_chat");

    let (mut server_child, mut server_stdout) = spawn_server(binary).await?;
    let addr = read_server_addr(&mut server_stdout).await?;
    let server_log_task = tokio::spawn(drain_stdout(server_stdout));

    let mut alice = spawn_client(binary, "alice", &addr).await?;
    let roster = read_line_expect(&mut alice.stdout, "waiting for alice roster").await?;
    assert_eq!(roster, "*** online: alice");

    let mut bob = spawn_client(binary, "bob", &addr).await?;
    let roster = read_line_expect(&mut bob.stdout, "waiting for bob roster").await?;
    assert_eq!(roster, "*** online: alice, bob");

    let notice = read_line_expect(&mut alice.stdout, "waiting for join notice").await?;
    assert_eq!(notice, "<Server> bob has joined the chat.");
    let roster = read_line_expect(&mut alice.stdout, "waiting for updated roster").await?;
    assert_eq!(roster, "*** online: alice, bob");

    // Text without a command prefix is a broadcast.
    alice.send_line("hello bob").await.context("alice send chat")?;
    let chat = read_line_expect(&mut bob.stdout, "waiting for bob to read chat").await?;
    assert_eq!(chat, "<alice> hello bob");

    bob.send_line("dm:alice:hi back").await.context("bob send dm")?;
    let direct = read_line_expect(&mut alice.stdout, "waiting for alice to read dm").await?;
    assert_eq!(direct, "[dm] <bob> hi back");

    // EXIT from any client shuts the whole chat down.
    bob.send_line("exit").await.context("bob send exit")?;
    let bob_closed = read_line_expect(&mut bob.stdout, "waiting for bob to close").await?;
    assert_eq!(bob_closed, "*** disconnected");
    let alice_closed = read_line_expect(&mut alice.stdout, "waiting for alice to close").await?;
    assert_eq!(alice_closed, "*** disconnected");

    ensure_success(&mut alice.child, "alice client").await?;
    ensure_success(&mut bob.child, "bob client").await?;
    ensure_success(&mut server_child, "server").await?;
    let _ = server_log_task.await;

    Ok(())
}

struct ClientProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ClientProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }
}

async fn spawn_server(binary: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("server")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .env("RUST_LOG", "info")
        .env("RUST_LOG_STYLE", "never")
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().context("failed to spawn server")?;
    let stdout = child
        .stdout
        .take()
        .context("server stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_server_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    let line = read_line(reader)
        .await?
        .context("server did not emit listening address")?;
    let trimmed = line.trim();
    let addr = trimmed
        .split_whitespace()
        .last()
        .context("unexpected server banner format")?;
    if !addr.contains(':') {
        return Err(anyhow!("server banner missing socket: {trimmed}"));
    }
    Ok(addr.to_string())
}

async fn spawn_client(binary: &Path, username: &str, addr: &str) -> Result<ClientProcess> {
    let mut cmd = Command::new(binary);
    cmd.arg("client")
        .arg("--username")
        .arg(username)
        .arg("--server")
        .arg(addr)
        .arg("--bind")
        .arg("127.0.0.1:0")
        .env("RUST_LOG", "warn")
        .env("RUST_LOG_STYLE", "never")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn client {username}"))?;

    let stdin = child
        .stdin
        .take()
        .context("client stdin missing after spawn")?;
    let stdout = child
        .stdout
        .take()
        .context("client stdout missing after spawn")?;

    let mut process = ClientProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
    };

    let welcome = read_line_expect(&mut process.stdout, "waiting for join banner").await?;
    if welcome != format!("*** joined as {username}") {
        return Err(anyhow!(
            "expected join banner for {username}, got '{welcome}'"
        ));
    }

    Ok(process)
}

async fn read_line_expect(
    reader: &mut BufReader<ChildStdout>,
    description: &str,
) -> Result<String> {
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = child
        .wait()
        .await
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
