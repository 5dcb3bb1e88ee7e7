use clap::Parser;
use shared::{Packet, PlayerId, ResourceType, MAX_PACKET_SIZE};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

/// Plays a session against a node: joins, produces, prints updates, leaves
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Node address
    #[arg(short, long, default_value = "127.0.0.1:7000")]
    server: SocketAddr,

    /// Player id; a random one is used if omitted
    #[arg(long)]
    player: Option<PlayerId>,

    /// Resource to produce
    #[arg(short, long, default_value = "ore")]
    resource: ResourceType,

    /// Amount per production
    #[arg(short, long, default_value = "1")]
    amount: u64,

    /// Number of productions; 0 only listens for teammates' updates
    #[arg(short, long, default_value = "10")]
    count: u32,
}

async fn send(socket: &UdpSocket, packet: &Packet, addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let data = packet.encode()?;
    socket.send_to(&data, addr).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let player = args.player.unwrap_or_else(PlayerId::random);

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);
    println!("Playing as {}", player);

    send(&socket, &Packet::Join { player }, args.server).await?;

    let mut buf = [0u8; MAX_PACKET_SIZE];
    let rounds = args.count.max(10);

    for round in 0..rounds {
        if round < args.count {
            let produce = Packet::Produce {
                player,
                resource: args.resource,
                amount: args.amount,
            };
            println!("Producing {} {}", args.amount, args.resource);
            send(&socket, &produce, args.server).await?;
        } else {
            send(&socket, &Packet::Heartbeat { player }, args.server).await?;
        }

        // Drain whatever updates arrived for this session
        while let Ok(Ok((len, _))) = timeout(Duration::from_millis(200), socket.recv_from(&mut buf)).await {
            match Packet::decode(&buf[..len]) {
                Ok(Packet::CollectionUpdate { notification }) => {
                    println!(
                        "Update: {} was at {} (subject {:?})",
                        notification.resource, notification.previous, notification.subject
                    );
                }
                Ok(other) => println!("Unexpected packet: {:?}", other),
                Err(e) => println!("Failed to deserialize packet: {}", e),
            }
        }

        sleep(Duration::from_millis(800)).await;
    }

    send(&socket, &Packet::Leave { player }, args.server).await?;
    println!("Test client finished");

    Ok(())
}
