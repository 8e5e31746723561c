use color_eyre::{eyre::eyre, Result};
use relaymesh::config::{self, GpioBackend, NodeConfig, Role};
use relaymesh::device::{DeviceId, HardwareAddress, IdentitySource, InterfaceIdentity};
use relaymesh::lifecycle::{Lifecycle, RESTART_EXIT_CODE};
use relaymesh::link::{BrokerLink, MeshTransport, MeshUplink, UdpMesh, Uplink};
use relaymesh::node::root::{run_root, RootInbound};
use relaymesh::node::{boot, leaf::run_leaf, NodeParts};
use relaymesh::provisioning::{confirm_network_join, spawn_announcer, Provisioning};
use relaymesh::relay::{dispatch, rpi::RppalBoard, sim::SimulatedBoard, PinBank};
use relaymesh::storage::{self, TomlFlagStore};
use relaymesh::FatalError;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    setup()?;

    let config_path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => config::default_path()?,
    };
    NodeConfig::ensure_default(&config_path).await?;
    let config = NodeConfig::load(&config_path).await?;
    info!("Loaded {:?} config from {}", config.role, config_path.display());

    let address = resolve_address(&config)?;
    let store = storage::shared(TomlFlagStore::open(&config.storage.path)?);
    let (lifecycle, mut restarts) = Lifecycle::new();
    let board = open_board(&config)?;

    let mut tasks: JoinSet<Result<(), FatalError>> = JoinSet::new();

    match config.role {
        Role::Root => {
            let id = DeviceId::from(address);
            let broker = BrokerLink::spawn(&config.broker, &id);
            let (mesh, mesh_rx, _mesh_task) =
                UdpMesh::bind(address, &config.mesh.bind, None).await?;
            let uplink: Arc<dyn Uplink> = Arc::new(broker.uplink);

            let ctx = boot(parts(&config, address, board, store.clone(), uplink, lifecycle.clone()))
                .await?;
            let provisioning = Provisioning::resume(ctx.device_id.clone(), store.clone()).await;
            if let Some(token) = provisioning.announcer_token() {
                spawn_announcer(ctx.clone(), token, config.timing.announce());
            }

            let joined = broker.joined;
            let join_store = store.clone();
            let join_lifecycle = lifecycle.clone();
            tasks.spawn(async move {
                if joined.await.is_ok() {
                    confirm_network_join(&join_store, &join_lifecycle).await?;
                }
                Ok(())
            });
            tasks.spawn(dispatch::run(ctx.clone()));
            tasks.spawn(run_root(
                ctx,
                Arc::new(mesh),
                RootInbound {
                    broker: broker.inbound,
                    mesh: mesh_rx,
                },
                provisioning,
            ));
        }
        Role::Leaf => {
            let upstream = config
                .mesh
                .upstream
                .as_deref()
                .ok_or_else(|| eyre!("Leaf nodes need mesh.upstream"))?;
            let (mesh, mesh_rx, _mesh_task) =
                UdpMesh::bind(address, &config.mesh.bind, Some(upstream)).await?;
            let mesh: Arc<dyn MeshTransport> = Arc::new(mesh);
            let uplink: Arc<dyn Uplink> = Arc::new(MeshUplink::new(mesh));

            let ctx = boot(parts(&config, address, board, store.clone(), uplink, lifecycle.clone()))
                .await?;
            confirm_network_join(&store, &lifecycle).await?;

            let provisioning = Provisioning::resume(ctx.device_id.clone(), store.clone()).await;
            if let Some(token) = provisioning.announcer_token() {
                spawn_announcer(ctx.clone(), token, config.timing.announce());
            }
            tasks.spawn(dispatch::run(ctx.clone()));
            tasks.spawn(run_leaf(ctx, mesh_rx, provisioning));
        }
    }

    let restart = ExitCode::from(RESTART_EXIT_CODE);
    let code = tokio::select! {
        reason = restarts.recv() => match reason {
            Some(reason) => {
                info!("Exiting for restart ({})", reason);
                restart
            }
            None => {
                warn!("Lifecycle channel closed");
                ExitCode::FAILURE
            }
        },
        Some(result) = tasks.join_next() => match result {
            Ok(Ok(())) => {
                // Tasks only finish on their own after requesting a restart
                if let Ok(reason) = restarts.try_recv() {
                    info!("Exiting for restart ({})", reason);
                    restart
                } else {
                    warn!("Node task finished");
                    ExitCode::FAILURE
                }
            }
            Ok(Err(e)) => {
                error!("Fatal: {}", e);
                return Err(e.into());
            }
            Err(e) => return Err(eyre!("Node task panicked: {}", e)),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            ExitCode::SUCCESS
        }
    };

    tasks.abort_all();
    Ok(code)
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    let level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|value| value.parse::<Level>().ok())
        .unwrap_or(Level::INFO);

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

fn resolve_address(config: &NodeConfig) -> Result<HardwareAddress> {
    let address = match &config.identity.hardware_address {
        Some(fixed) => fixed.parse::<HardwareAddress>()?,
        None => InterfaceIdentity {
            interface: config.identity.interface.clone(),
        }
        .hardware_address()?,
    };
    info!("Hardware address {}", address);
    Ok(address)
}

fn open_board(config: &NodeConfig) -> Result<Arc<dyn PinBank>> {
    let board: Arc<dyn PinBank> = match config.gpio.backend {
        GpioBackend::Rppal => Arc::new(RppalBoard::open()?),
        GpioBackend::Simulated => {
            info!("Using simulated GPIO board");
            Arc::new(SimulatedBoard::with_wired_buttons(&config.gpio.simulated_wired))
        }
    };
    Ok(board)
}

fn parts(
    config: &NodeConfig,
    address: HardwareAddress,
    board: Arc<dyn PinBank>,
    store: storage::SharedStore,
    uplink: Arc<dyn Uplink>,
    lifecycle: Lifecycle,
) -> NodeParts {
    NodeParts {
        device_name: config.device_name.clone(),
        address,
        board,
        gpio: config.gpio.clone(),
        timing: config.timing.clone(),
        store,
        uplink,
        lifecycle,
    }
}
