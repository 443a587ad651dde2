//! Process spawn/wait/kill plumbing, grounded on the
//! `CommandEventStream` / `gather_output` / `kill_process` pattern: a
//! command's stdout and stderr are multiplexed into a single stream of
//! [`CommandEvent`]s terminated by exactly one `Exit` event, with
//! cancellation racing the process's own completion.

use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::future::{Fuse, FutureExt};
use futures::stream::{Fuse as StreamFuse, Stream, StreamExt, TryStreamExt};
use pin_project::pin_project;
use tokio::process::Child;
use tokio_util::codec::{BytesCodec, FramedRead};

#[derive(Debug, Clone, Copy)]
pub enum GatherOutputStatus {
    Finished(Option<i32>),
    TimedOut(Duration),
    Cancelled,
}

#[derive(Debug)]
pub enum CommandEvent {
    Stdout(Bytes),
    Stderr(Bytes),
    Exit(GatherOutputStatus),
}

enum StdioEvent {
    Stdout(Bytes),
    Stderr(Bytes),
}

impl From<StdioEvent> for CommandEvent {
    fn from(e: StdioEvent) -> Self {
        match e {
            StdioEvent::Stdout(b) => CommandEvent::Stdout(b),
            StdioEvent::Stderr(b) => CommandEvent::Stderr(b),
        }
    }
}

/// Yields [`CommandEvent`]s for stdout/stderr as they arrive, finishing
/// with exactly one `Exit` event once both the process and the stdio
/// streams have drained.
#[pin_project]
struct CommandEventStream<Status, Stdio> {
    exit: Option<anyhow::Result<GatherOutputStatus>>,
    done: bool,
    #[pin]
    status: Fuse<Status>,
    #[pin]
    stdio: StreamFuse<Stdio>,
}

impl<Status, Stdio> CommandEventStream<Status, Stdio>
where
    Status: std::future::Future,
    Stdio: Stream,
{
    fn new(status: Status, stdio: Stdio) -> Self {
        Self {
            exit: None,
            done: false,
            status: status.fuse(),
            stdio: stdio.fuse(),
        }
    }
}

impl<Status, Stdio> Stream for CommandEventStream<Status, Stdio>
where
    Status: std::future::Future<Output = anyhow::Result<GatherOutputStatus>>,
    Stdio: Stream<Item = anyhow::Result<StdioEvent>>,
{
    type Item = anyhow::Result<CommandEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.done {
            return Poll::Ready(None);
        }

        if let Poll::Ready(status) = this.status.as_mut().poll(cx) {
            *this.exit = Some(status);
        }

        if let Some(stdio) = futures::ready!(this.stdio.as_mut().poll_next(cx)) {
            return Poll::Ready(Some(stdio.map(Into::into)));
        }

        if let Some(exit) = this.exit.take() {
            *this.done = true;
            return Poll::Ready(Some(exit.map(CommandEvent::Exit)));
        }

        Poll::Pending
    }
}

pub async fn timeout_into_cancellation(
    timeout: Option<Duration>,
) -> anyhow::Result<GatherOutputStatus> {
    match timeout {
        Some(t) => {
            tokio::time::sleep(t).await;
            Ok(GatherOutputStatus::TimedOut(t))
        }
        None => futures::future::pending().await,
    }
}

fn stream_command_events<T>(
    mut child: Child,
    cancellation: T,
) -> anyhow::Result<impl Stream<Item = anyhow::Result<CommandEvent>>>
where
    T: std::future::Future<Output = anyhow::Result<GatherOutputStatus>>,
{
    use anyhow::Context as _;

    let stdout = child.stdout.take().context("child stdout is not piped")?;
    let stderr = child.stderr.take().context("child stderr is not piped")?;

    let status = async move {
        let wait = async {
            let status = child.wait().await?;
            anyhow::Ok((GatherOutputStatus::Finished(status.code()), false))
        };
        let cancellation = async {
            let status = cancellation.await?;
            anyhow::Ok((status, true))
        };

        futures::pin_mut!(wait);
        futures::pin_mut!(cancellation);

        let (outcome, _) = futures::future::select(wait, cancellation)
            .await
            .factor_first();
        let (result, cancelled) = outcome?;

        if cancelled {
            kill_process(&child).context("failed to terminate child after cancellation")?;
        }

        anyhow::Ok(result)
    };

    let stdout = FramedRead::new(stdout, BytesCodec::new())
        .map(|r| anyhow::Ok(StdioEvent::Stdout(r?.freeze())));
    let stderr = FramedRead::new(stderr, BytesCodec::new())
        .map(|r| anyhow::Ok(StdioEvent::Stderr(r?.freeze())));

    let stdio = futures::stream::select(stdout, stderr);

    Ok(CommandEventStream::new(status, stdio))
}

async fn decode_command_event_stream<S>(
    stream: S,
) -> anyhow::Result<(GatherOutputStatus, Vec<u8>, Vec<u8>)>
where
    S: Stream<Item = anyhow::Result<CommandEvent>>,
{
    futures::pin_mut!(stream);

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    while let Some(event) = stream.try_next().await? {
        match event {
            CommandEvent::Stdout(bytes) => stdout.extend(&bytes),
            CommandEvent::Stderr(bytes) => stderr.extend(&bytes),
            CommandEvent::Exit(status) => return Ok((status, stdout, stderr)),
        }
    }

    Err(anyhow::anyhow!("command stream ended without an Exit event"))
}

/// Spawns `cmd`, multiplexes its stdout/stderr, and waits for either
/// completion or `cancellation` to resolve first, killing the process
/// tree in the latter case.
pub async fn gather_output<T>(
    cmd: tokio::process::Command,
    cancellation: T,
) -> anyhow::Result<(GatherOutputStatus, Vec<u8>, Vec<u8>)>
where
    T: std::future::Future<Output = anyhow::Result<GatherOutputStatus>> + Send,
{
    use anyhow::Context as _;

    let child = spawn_retry_txt_busy(cmd, || tokio::time::sleep(Duration::from_millis(50)))
        .await
        .context("failed to spawn command")?;

    let stream = stream_command_events(child, cancellation)?;
    decode_command_event_stream(stream).await
}

fn kill_process(child: &Child) -> anyhow::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    tracing::info!(pid, "killing process group");
    kill_process_impl(pid)
}

#[cfg(unix)]
fn kill_process_impl(pid: u32) -> anyhow::Result<()> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let pid: i32 = pid.try_into()?;
    match signal::killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(anyhow::anyhow!("failed to kill process group {pid}: {e}")),
    }
}

#[cfg(not(unix))]
fn kill_process_impl(pid: u32) -> anyhow::Result<()> {
    let _ = pid;
    Ok(())
}

/// Prepares `cmd` for hermetic execution: its own process group (so a
/// kill takes any children with it), stdin closed, stdout/stderr piped.
pub fn prepare_command(mut cmd: std::process::Command) -> tokio::process::Command {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd.into()
}

/// Retries a spawn a bounded number of times on `ETXTBSY`: a thread in
/// this process may briefly hold the target executable open for
/// writing (after a cache write, say) between our close and the
/// kernel's exec, so a `spawn` landing in that window fails spuriously.
async fn spawn_retry_txt_busy<F, D>(
    mut cmd: tokio::process::Command,
    mut delay: F,
) -> io::Result<Child>
where
    F: FnMut() -> D,
    D: std::future::Future<Output = ()>,
{
    let mut attempts = 10;
    loop {
        let res = cmd.spawn();

        #[cfg(unix)]
        let is_txt_busy = matches!(
            res.as_ref().map_err(|e| e.raw_os_error()),
            Err(Some(libc::ETXTBSY))
        );
        #[cfg(not(unix))]
        let is_txt_busy = false;

        if attempts == 0 || !is_txt_busy {
            return res;
        }

        delay().await;
        attempts -= 1;
    }
}
