//! Manual smoke-test client: connects, hosts a public room, readies up and
//! echoes everything the server sends for a short while.

use shared::protocol::{CreateRoomRequest, PlayerState};
use shared::{read_message, write_message, Message, RoomVisibility};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("127.0.0.1:{}", shared::DEFAULT_PORT);
    let mut stream = TcpStream::connect(&addr).await?;
    println!("Connected to {}", addr);

    // First message is always our own identity
    let Some(Message::Init(init)) = read_message(&mut stream).await? else {
        println!("Server closed before assigning an identity");
        return Ok(());
    };
    println!(
        "Assigned player id {} with color ({}, {}, {})",
        init.player_id, init.color.r, init.color.g, init.color.b
    );

    // Drain the late-joiner replay of peers already connected
    while let Ok(Ok(Some(message))) =
        timeout(Duration::from_millis(200), read_message(&mut stream)).await
    {
        println!("Replayed: {:?}", message);
    }

    write_message(
        &mut stream,
        &Message::CreateRoomRequest(CreateRoomRequest {
            max_players: 4,
            visibility: RoomVisibility::Public,
            total_rounds: 0,
        }),
    )
    .await?;

    match read_message(&mut stream).await? {
        Some(Message::CreateRoomResponse(response)) if response.success => {
            println!("Hosting room {}", response.code);
        }
        other => {
            println!("Room creation failed: {:?}", other);
            return Ok(());
        }
    }

    write_message(&mut stream, &Message::PlayerReady(true)).await?;
    println!("Marked ready, listening for 10 seconds...");

    let mut x = 100.0f32;
    for _ in 0..10 {
        x += 10.0;
        write_message(
            &mut stream,
            &Message::PlayerState(PlayerState {
                player_id: init.player_id,
                x,
                y: 300.0,
                crouching: false,
                scale_y: 1.0,
                color: init.color,
            }),
        )
        .await?;

        while let Ok(result) = timeout(Duration::from_millis(100), read_message(&mut stream)).await
        {
            match result? {
                Some(message) => println!("Received: {:?}", message),
                None => {
                    println!("Server closed the connection");
                    return Ok(());
                }
            }
        }
        sleep(Duration::from_millis(900)).await;
    }

    write_message(&mut stream, &Message::LeaveRoom).await?;
    println!("Test client finished");
    Ok(())
}
