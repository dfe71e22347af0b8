use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tws_topology::domain::models::{
    ConnectablePeerParams, ProcResult, ProcedureEvent, ProcedureId, ProcedureParams, Profile,
    ProfileSet, TopologyCommand,
};
use tws_topology::domain::services::Services;
use tws_topology::domain::settings::SettingsService;
use tws_topology::infrastructure::logging::init_logger;
use tws_topology::infrastructure::simulator::SimulatedPlatform;
use tws_topology::Topology;

/// Goals a Primary walks through after power on
const STARTUP_GOALS: [(ProcedureId, ProcedureParams); 3] = [
    (ProcedureId::SetPrimaryAddressAndFindRole, ProcedureParams::None),
    (
        ProcedureId::PriConnectablePeer,
        ProcedureParams::ConnectablePeer(ConnectablePeerParams::ENABLE),
    ),
    (
        ProcedureId::PriConnectPeerProfiles,
        ProcedureParams::ConnectPeerProfiles(ProfileSet::of(&Profile::ALL)),
    ),
];

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();
    let _log_guard = init_logger(&settings.log_settings)?;
    info!("Starting TWS topology simulator");

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let platform = SimulatedPlatform::new(settings.simulation.clone(), command_tx.clone());
    let topology = Topology::new(
        Services::from_platform(platform),
        settings.topology.clone(),
        event_tx,
    );
    let topology_task = tokio::spawn(topology.run(command_rx));

    for (id, params) in STARTUP_GOALS {
        command_tx.send(TopologyCommand::Start(id, params))?;
        let result = wait_for(&mut event_rx, id).await?;
        if result != ProcResult::Success {
            warn!("Goal {} ended with {}, stopping", id, result);
            break;
        }
    }

    command_tx.send(TopologyCommand::Shutdown)?;
    topology_task.await??;

    // Persist so defaults show up in the settings file
    settings_service.save()?;
    info!("Simulator finished");
    Ok(())
}

/// Wait for the terminal event of `id`
async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<ProcedureEvent>,
    id: ProcedureId,
) -> anyhow::Result<ProcResult> {
    while let Some(event) = events.recv().await {
        match event {
            ProcedureEvent::Completed { proc, result } | ProcedureEvent::Cancelled { proc, result }
                if proc == id =>
            {
                info!("Goal {} finished: {}", proc, result);
                return Ok(result);
            }
            ProcedureEvent::Started { proc, result } => {
                debug!("Goal {} started: {}", proc, result);
            }
            other => debug!("Unrelated event {:?}", other),
        }
    }
    anyhow::bail!("Topology stopped before {} finished", id)
}
