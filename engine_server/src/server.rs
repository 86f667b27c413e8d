//! Server implementation.
//!
//! A fixed-timestep host around one [`EventSystem`]. Each tick it:
//! - applies console commands received from the console thread
//! - drains events queued by other threads
//!
//! The server must stay on the thread that created it; everything else talks
//! to it through [`GameServer::sender`] or the console channel.

use std::{sync::Arc, time::Duration};

use engine_shared::{
    config::EngineConfig,
    ecs::{ComponentType, EntityRef, World},
    event::{priority, EventSender, EventSystem},
    net::{NetworkComponent, NetworkSystem, NullNetwork},
};
use tokio::{sync::mpsc, time::Instant};
use tracing::{info, warn};

use crate::{
    console::ConsoleCommand,
    gameplay::{
        self, Armor, ArmorSystem, AttackRequested, CombatSystem, DeathCounter, Died, Healed,
        Health, HealthSystem,
    },
};

/// Game server.
pub struct GameServer {
    pub cfg: EngineConfig,
    world: Arc<World>,
    events: EventSystem,
    deaths: Arc<DeathCounter>,
    tick: u64,
    next_net_id: u32,
    running: bool,

    /// Channel for console commands from stdin.
    console_rx: Option<mpsc::Receiver<ConsoleCommand>>,
}

impl GameServer {
    /// Creates a server without networking.
    pub fn new(cfg: EngineConfig) -> anyhow::Result<Self> {
        Self::with_network(cfg, Arc::new(NullNetwork))
    }

    /// Creates a server that replicates through `network`.
    pub fn with_network(
        cfg: EngineConfig,
        network: Arc<dyn NetworkSystem>,
    ) -> anyhow::Result<Self> {
        let world = World::new();
        let events = EventSystem::new(cfg.events.clone(), network);
        gameplay::register_events(&events)?;

        let mut handlers = 0;
        handlers += events.register_event_handler(&Arc::new(CombatSystem));
        handlers += events.register_event_handler(&Arc::new(ArmorSystem));
        handlers += events.register_event_handler(&Arc::new(HealthSystem::new(world.clone())));

        let deaths = Arc::new(DeathCounter::default());
        let health = [ComponentType::of::<Health>()];
        events.register_event_receiver::<Died, _>(&deaths, priority::LOW, &health);
        info!(handlers = handlers + 1, headless = cfg.events.headless, "Event handlers registered");

        Ok(Self {
            cfg,
            world,
            events,
            deaths,
            tick: 0,
            next_net_id: 1,
            running: true,
            console_rx: None,
        })
    }

    /// Sets the console input receiver.
    pub fn set_console_input(&mut self, rx: mpsc::Receiver<ConsoleCommand>) {
        self.console_rx = Some(rx);
    }

    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    pub fn events(&self) -> &EventSystem {
        &self.events
    }

    /// Handle for sending events from other threads.
    pub fn sender(&self) -> EventSender {
        self.events.sender()
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn deaths(&self) -> u64 {
        self.deaths.deaths()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Spawns a damageable, network-visible entity.
    pub fn spawn_target(&mut self, health: i32, armor: Option<i32>) -> EntityRef {
        let entity = self.world.spawn();
        self.world.insert(entity.id(), Health::full(health));
        if let Some(armor) = armor {
            self.world.insert(entity.id(), Armor(armor));
        }
        self.world.insert(
            entity.id(),
            NetworkComponent {
                net_id: self.next_net_id,
            },
        );
        self.next_net_id += 1;
        info!(entity = %entity.id(), health, ?armor, "Spawned target");
        entity
    }

    /// Executes a console command and returns its output lines.
    pub fn exec(&mut self, command: ConsoleCommand) -> Vec<String> {
        if command.is_event() {
            // Same path as the console thread, so the effect shows up on the
            // next process().
            send_event_command(&self.sender(), &self.world, &command);
            return vec![format!("Queued {command:?}")];
        }

        match command {
            ConsoleCommand::Spawn { health, armor } => {
                let entity = self.spawn_target(health, armor);
                vec![format!("Spawned {}", entity.id())]
            }
            ConsoleCommand::Status => self.status(),
            ConsoleCommand::Quit => {
                info!("Server shutting down");
                self.running = false;
                vec!["Shutting down".to_string()]
            }
            ConsoleCommand::Attack { .. } | ConsoleCommand::Heal { .. } => Vec::new(),
        }
    }

    fn status(&self) -> Vec<String> {
        let stats = self.events.stats();
        let mut out = vec![
            format!("Tick: {}", self.tick),
            format!("Entities: {}", self.world.len()),
            format!("Handlers: {}", self.events.handler_count()),
            format!(
                "Dispatched: {} (drained {}, consumed {})",
                stats.dispatched, stats.drained, stats.consumed
            ),
            format!(
                "Handler calls: {} ({} failed)",
                stats.handler_calls, stats.handler_failures
            ),
            format!("Deaths: {}", self.deaths()),
        ];
        for (id, health) in self.world.iter::<Health>() {
            out.push(format!("  {id}: {}/{}", health.current, health.max));
        }
        out
    }

    /// Runs the server for a number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        anyhow::ensure!(self.cfg.tick_hz > 0, "tick_hz must be positive");
        let dt = Duration::from_secs_f32(1.0 / self.cfg.tick_hz as f32);
        let mut next = Instant::now();

        for _ in 0..ticks {
            if !self.running {
                break;
            }
            next += dt;
            self.step();
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one fixed step. Returns how many queued events were delivered.
    pub fn step(&mut self) -> usize {
        self.process_console_commands();
        let drained = self.events.process();
        self.tick += 1;
        drained
    }

    fn process_console_commands(&mut self) {
        // Collect first to avoid borrow conflict.
        let commands: Vec<ConsoleCommand> = match self.console_rx.as_mut() {
            Some(rx) => std::iter::from_fn(|| rx.try_recv().ok()).collect(),
            None => Vec::new(),
        };

        for command in commands {
            for line in self.exec(command) {
                println!("{line}");
            }
        }
    }
}

/// Sends the event behind an attack or heal command. Usable from any thread.
pub fn send_event_command(
    sender: &EventSender,
    world: &Arc<World>,
    command: &ConsoleCommand,
) -> bool {
    match *command {
        ConsoleCommand::Attack { entity, amount, fire } => sender.send(
            &world.entity(entity),
            AttackRequested {
                amount,
                fire,
                attacker: None,
            },
        ),
        ConsoleCommand::Heal { entity, amount } => {
            sender.send(&world.entity(entity), Healed { amount })
        }
        ref other => {
            warn!(command = ?other, "Not an event command");
            false
        }
    }
}

/// Helper for tests: a headless server with no networking.
pub fn headless(tick_hz: u32) -> anyhow::Result<GameServer> {
    let mut cfg = EngineConfig {
        tick_hz,
        ..Default::default()
    };
    cfg.events.headless = true;
    GameServer::new(cfg)
}
