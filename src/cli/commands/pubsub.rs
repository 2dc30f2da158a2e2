//! kcat-style client commands: `stompd send` and `stompd listen`.

use crate::cli::args::{BrokerArgs, ListenArgs, SendArgs};
use crate::protocol::codec::{write_frame, FrameEvent, FrameLimits, FrameReader};
use crate::protocol::frame::headers;
use crate::protocol::{Command, Frame};
use anyhow::{bail, Context, Result};
use std::io::BufRead;
use tokio::net::TcpStream;

/// Minimal STOMP client over the crate's own codec.
struct StompClient {
    stream: TcpStream,
    frames: FrameReader,
}

impl StompClient {
    async fn connect(broker: &BrokerArgs) -> Result<Self> {
        let addr = format!("{}:{}", broker.host, broker.port);
        let stream = TcpStream::connect(&addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        let mut client = Self {
            stream,
            frames: FrameReader::new(FrameLimits::default()),
        };

        let mut connect = Frame::new(Command::Connect)
            .with_header(headers::ACCEPT_VERSION, "1.0,1.1,1.2")
            .with_header(headers::HEARTBEAT, "0,0");
        if let Some(login) = &broker.login {
            connect.headers.add(headers::LOGIN, login);
        }
        if let Some(passcode) = &broker.passcode {
            connect.headers.add(headers::PASSCODE, passcode);
        }
        client.send(&connect).await?;

        let reply = client.recv().await?;
        match reply.command {
            Command::Connected => Ok(client),
            Command::Error => bail!(
                "broker rejected connection: {}",
                reply.header(headers::MESSAGE).unwrap_or("unknown error")
            ),
            other => bail!("unexpected {other} frame during handshake"),
        }
    }

    async fn send(&mut self, frame: &Frame) -> Result<()> {
        write_frame(&mut self.stream, frame, false)
            .await
            .context("write frame")
    }

    /// Next frame, skipping heart-beat EOLs.
    async fn recv(&mut self) -> Result<Frame> {
        loop {
            match self.frames.read_event(&mut self.stream).await? {
                FrameEvent::Frame(frame) => return Ok(frame),
                FrameEvent::Heartbeat => {}
            }
        }
    }

    async fn expect_receipt(&mut self, receipt_id: &str) -> Result<()> {
        let frame = self.recv().await?;
        match frame.command {
            Command::Receipt if frame.header(headers::RECEIPT_ID) == Some(receipt_id) => Ok(()),
            Command::Error => bail!(
                "broker error: {}",
                frame.header(headers::MESSAGE).unwrap_or("unknown")
            ),
            other => bail!("expected RECEIPT {receipt_id}, got {other}"),
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        let frame = Frame::new(Command::Disconnect).with_header(headers::RECEIPT, "bye");
        self.send(&frame).await?;
        // Tolerate brokers that close before the receipt arrives.
        let _ = self.expect_receipt("bye").await;
        Ok(())
    }
}

pub async fn run_send(args: SendArgs) -> Result<()> {
    let mut client = StompClient::connect(&args.broker).await?;

    let bodies: Vec<String> = if args.body.is_empty() {
        std::io::stdin()
            .lock()
            .lines()
            .collect::<std::io::Result<_>>()
            .context("read stdin")?
    } else {
        args.body.clone()
    };

    if let Some(tx) = &args.transaction {
        let begin = Frame::new(Command::Begin).with_header(headers::TRANSACTION, tx);
        client.send(&begin).await?;
    }

    for (index, body) in bodies.iter().enumerate() {
        let mut frame = Frame::new(Command::Send)
            .with_header(headers::DESTINATION, &args.destination)
            .with_body(body.as_bytes());
        frame
            .headers
            .add(headers::CONTENT_LENGTH, body.len().to_string());
        if let Some(tx) = &args.transaction {
            frame.headers.add(headers::TRANSACTION, tx);
        }
        if args.receipt {
            frame.headers.add(headers::RECEIPT, format!("send-{index}"));
        }
        client.send(&frame).await?;
        if args.receipt {
            client.expect_receipt(&format!("send-{index}")).await?;
        }
    }

    if let Some(tx) = &args.transaction {
        let commit = Frame::new(Command::Commit)
            .with_header(headers::TRANSACTION, tx)
            .with_header(headers::RECEIPT, "commit");
        client.send(&commit).await?;
        client.expect_receipt("commit").await?;
    }

    client.disconnect().await?;
    println!("sent {} message(s) to {}", bodies.len(), args.destination);
    Ok(())
}

pub async fn run_listen(args: ListenArgs) -> Result<()> {
    let mut client = StompClient::connect(&args.broker).await?;

    let subscribe = Frame::new(Command::Subscribe)
        .with_header(headers::ID, "0")
        .with_header(headers::DESTINATION, &args.destination)
        .with_header(headers::ACK, &args.ack)
        .with_header(headers::RECEIPT, "sub");
    client.send(&subscribe).await?;
    client.expect_receipt("sub").await?;
    eprintln!("subscribed to {}, waiting for messages", args.destination);

    loop {
        let frame = tokio::select! {
            frame = client.recv() => frame?,
            _ = tokio::signal::ctrl_c() => break,
        };
        match frame.command {
            Command::Message => {
                println!("{}", frame.body_as_string());
                if args.ack_each {
                    if let Some(ack_id) = frame.header(headers::ACK).map(str::to_string) {
                        let ack = Frame::new(Command::Ack).with_header(headers::ID, ack_id);
                        client.send(&ack).await?;
                    }
                }
            }
            Command::Error => {
                bail!(
                    "broker error: {}",
                    frame.header(headers::MESSAGE).unwrap_or("unknown")
                );
            }
            other => {
                eprintln!("ignoring unexpected {other} frame");
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}
