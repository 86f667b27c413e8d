use std::time::Duration;

use engine_server::{
    console::ConsoleCommand,
    gameplay::{AttackRequested, Health},
    server::{headless, send_event_command},
};
use engine_tests::init_tracing;

/// Smoke test: server can run a few ticks without panicking.
#[tokio::test]
async fn server_runs_few_ticks() -> anyhow::Result<()> {
    init_tracing();
    let mut server = headless(64)?;
    server.run_for_ticks(3).await?;
    assert_eq!(server.tick(), 3);
    Ok(())
}

/// Events sent from a worker thread land on the server tick that follows.
#[tokio::test]
async fn worker_thread_attacks_are_applied_by_the_loop() -> anyhow::Result<()> {
    init_tracing();
    let mut server = headless(200)?;
    let target = server.spawn_target(100, Some(2));

    let sender = server.sender();
    let world = server.world().clone();
    let id = target.id();
    let worker = std::thread::spawn(move || {
        // Blocked by armor.
        sender.send(
            &world.entity(id),
            AttackRequested {
                amount: 2,
                fire: false,
                attacker: None,
            },
        );
        for _ in 0..3 {
            send_event_command(
                &sender,
                &world,
                &ConsoleCommand::Attack {
                    entity: id,
                    amount: 10,
                    fire: true,
                },
            );
        }
    });
    worker.join().map_err(|_| anyhow::anyhow!("worker panicked"))?;

    tokio::time::timeout(Duration::from_secs(5), server.run_for_ticks(2)).await??;
    assert_eq!(server.world().get::<Health>(id).map(|h| h.current), Some(70));
    assert_eq!(server.events().stats().drained, 4);
    assert_eq!(server.events().stats().consumed, 1);
    Ok(())
}

#[tokio::test]
async fn lethal_damage_is_counted() -> anyhow::Result<()> {
    init_tracing();
    let mut server = headless(200)?;
    let target = server.spawn_target(5, None);
    server.exec(ConsoleCommand::Attack {
        entity: target.id(),
        amount: 50,
        fire: false,
    });
    server.run_for_ticks(1).await?;
    assert_eq!(server.deaths(), 1);

    for _ in 0..2 {
        server.exec(ConsoleCommand::Attack {
            entity: target.id(),
            amount: 50,
            fire: false,
        });
    }
    server.run_for_ticks(1).await?;
    assert_eq!(server.deaths(), 1);
    let status = server.exec(ConsoleCommand::Status);
    assert!(status.iter().any(|l| l == "Deaths: 1"));
    Ok(())
}
