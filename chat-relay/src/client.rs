use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    codec::{read_message, write_message},
    message::ChatMessage,
};

const EXIT_COMMANDS: &[&str] = &["/exit", "/quit"];

pub async fn run(args: ClientArgs) -> Result<()> {
    let (reader, mut writer) = establish_connection(&args).await?;
    send_login(&mut writer, &args.username).await?;
    write_stdout(&format!("*** connected as {}", args.username)).await?;

    // Frames are read on their own task: a frame read cut short by stdin
    // activity would leave the stream mid-frame.
    let mut incoming = tokio::spawn(receive_messages(reader));

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    run_client_loop(&mut incoming, &mut writer, &mut stdin, &mut input, &args.username).await?;
    incoming.abort();
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(args: &ClientArgs) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
    let server = args.server_addr();
    let stream = TcpStream::connect(&server)
        .await
        .with_context(|| format!("failed to connect to {server}"))?;

    info!("connected to {}", server);

    Ok(stream.into_split())
}

async fn send_login(writer: &mut OwnedWriteHalf, username: &str) -> Result<()> {
    write_message(writer, &ChatMessage::login(username)).await?;
    Ok(())
}

async fn run_client_loop(
    incoming: &mut JoinHandle<Result<()>>,
    writer: &mut OwnedWriteHalf,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
    username: &str,
) -> Result<()> {
    loop {
        input.clear();
        select! {
            finished = &mut *incoming => {
                handle_receiver_exit(finished);
                break;
            }
            bytes_read = stdin.read_line(input) => {
                if !handle_stdin_input(bytes_read, input, writer, username).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn receive_messages(mut reader: OwnedReadHalf) -> Result<()> {
    loop {
        match read_message(&mut reader).await {
            Ok(Some(message)) => render_message(&message).await?,
            Ok(None) => {
                write_stdout("*** server closed the connection").await?;
                return Ok(());
            }
            Err(err) if err.is_recoverable() => {
                warn!(error = %err, "skipping unreadable message");
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn handle_receiver_exit(finished: Result<Result<()>, tokio::task::JoinError>) {
    match finished {
        Ok(Ok(())) => {}
        Ok(Err(error)) => warn!(?error, "connection to server failed"),
        Err(error) => warn!(?error, "receiver task stopped unexpectedly"),
    }
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    writer: &mut OwnedWriteHalf,
    username: &str,
) -> Result<bool> {
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = input.trim_end_matches(['\r', '\n']);
    if text.trim().is_empty() {
        return Ok(true);
    }

    if EXIT_COMMANDS.iter().any(|cmd| text.eq_ignore_ascii_case(cmd)) {
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    write_message(writer, &ChatMessage::new(username, text)).await?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn render_message(message: &ChatMessage) -> io::Result<()> {
    write_stdout(&format!("{}> {}", message.sender, message.content)).await
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
