// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MRI Server (C10): a thin RPC façade translating wire requests into
//! object-store operations. Transport and wire codec are `lvp-wire`'s
//! length-prefixed JSON frames over a Unix socket (§4.10.1).

use std::collections::HashSet;
use std::sync::Arc;

use lvp_core::{CoreError, CoreResult, Machine, MachineCreateStrategy, MachineId, MachineSpec, Selector};
use lvp_engine::{EventFilter, EventStore};
use lvp_storage::ObjectStore;
use lvp_wire::{Request, Response, StatusCode};
use parking_lot::Mutex;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::machine_class::MachineClassSet;

/// Label the provider stamps on every Machine it creates, and the only
/// records `ListMachines` considers (§4.10).
pub const MANAGER_LABEL: &str = "manager";
pub const MANAGER_NAME: &str = "libvirt-provider";

/// Shared daemon context for every request handler, bundling the store,
/// work queue, event store, and active-console set (§4.10.1's `ListenCtx`).
pub struct ListenCtx {
    pub store: Arc<ObjectStore<Machine>>,
    pub events: Arc<EventStore>,
    pub machine_classes: Arc<MachineClassSet>,
    active_consoles: Mutex<HashSet<MachineId>>,
}

impl ListenCtx {
    pub fn new(store: Arc<ObjectStore<Machine>>, events: Arc<EventStore>, machine_classes: Arc<MachineClassSet>) -> Self {
        Self { store, events, machine_classes, active_consoles: Mutex::new(HashSet::new()) }
    }
}

/// Accepts connections on a Unix socket and spawns one task per connection.
pub struct Listener {
    unix: UnixListener,
    ctx: Arc<ListenCtx>,
}

impl Listener {
    pub fn new(unix: UnixListener, ctx: Arc<ListenCtx>) -> Self {
        Self { unix, ctx }
    }

    pub async fn run(self) {
        loop {
            match self.unix.accept().await {
                Ok((stream, _)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &ctx).await {
                            debug!(error = %e, "connection closed with error");
                        }
                    });
                }
                Err(e) => error!(error = %e, "accept error"),
            }
        }
    }
}

async fn handle_connection(mut stream: UnixStream, ctx: &ListenCtx) -> Result<(), lvp_wire::ProtocolError> {
    let (mut reader, mut writer) = stream.split();
    let request = lvp_wire::read_request(&mut reader).await?;
    info!(request = ?request, "received request");

    let response = match handle_request(request, ctx) {
        Ok(response) => response,
        Err(e) => {
            let code = StatusCode::from(&e);
            Response::Error { code, message: e.to_string() }
        }
    };

    lvp_wire::write_response(&mut writer, &response).await
}

fn handle_request(request: Request, ctx: &ListenCtx) -> CoreResult<Response> {
    match request {
        Request::CreateMachine { class, power, labels, annotations, image, ignition, guest_agent, volumes, network_interfaces } => {
            create_machine(ctx, class, power, labels, annotations, image, ignition, guest_agent, volumes, network_interfaces)
        }

        Request::DeleteMachine { id } => {
            ctx.store.delete(&id)?;
            Ok(Response::Deleted)
        }

        Request::ListMachines { id, label_selector } => list_machines(ctx, id, label_selector),

        Request::UpdateMachinePower { id, power } => {
            let mut machine = ctx.store.get(&id)?;
            machine.spec.power = power;
            ctx.store.update(machine)?;
            Ok(Response::Ok)
        }

        Request::UpdateMachineAnnotations { id, annotations } => {
            let mut machine = ctx.store.get(&id)?;
            machine.annotations = annotations;
            ctx.store.update(machine)?;
            Ok(Response::Ok)
        }

        Request::AttachVolume { id, volume } => {
            let mut machine = ctx.store.get(&id)?;
            if machine.spec.volumes.iter().any(|v| v.name == volume.name) {
                return Err(CoreError::AlreadyExists(volume.name));
            }
            machine.spec.volumes.push(volume);
            ctx.store.update(machine)?;
            Ok(Response::Ok)
        }

        Request::DetachVolume { id, name } => {
            let mut machine = ctx.store.get(&id)?;
            machine.spec.volumes.retain(|v| v.name != name);
            ctx.store.update(machine)?;
            Ok(Response::Ok)
        }

        Request::UpdateVolume { id, volume } => {
            let mut machine = ctx.store.get(&id)?;
            let Some(slot) = machine.spec.volumes.iter_mut().find(|v| v.name == volume.name) else {
                return Err(CoreError::not_found(format!("volume {}", volume.name)));
            };
            *slot = volume;
            ctx.store.update(machine)?;
            Ok(Response::Ok)
        }

        Request::AttachNetworkInterface { id, network_interface } => {
            let mut machine = ctx.store.get(&id)?;
            if machine.spec.network_interfaces.iter().any(|n| n.name == network_interface.name) {
                return Err(CoreError::AlreadyExists(network_interface.name));
            }
            machine.spec.network_interfaces.push(network_interface);
            ctx.store.update(machine)?;
            Ok(Response::Ok)
        }

        Request::DetachNetworkInterface { id, name } => {
            let mut machine = ctx.store.get(&id)?;
            machine.spec.network_interfaces.retain(|n| n.name != name);
            ctx.store.update(machine)?;
            Ok(Response::Ok)
        }

        Request::Exec { id } => exec(ctx, id),

        Request::ListEvents { label_selector, events_from_time, events_to_time } => {
            let filter = EventFilter { selector: label_selector, from: events_from_time, to: events_to_time };
            Ok(Response::Events { events: ctx.events.list(&filter) })
        }

        Request::Status => Ok(Response::Status {
            classes: ctx
                .machine_classes
                .iter()
                .map(|c| lvp_wire::MachineClassInfo { name: c.name.clone(), cpu: c.cpu, memory_bytes: c.memory_bytes, capacity: None })
                .collect(),
        }),

        Request::Version => Ok(Response::Version { version: env!("CARGO_PKG_VERSION").to_string() }),
    }
}

#[allow(clippy::too_many_arguments)]
fn create_machine(
    ctx: &ListenCtx,
    class: String,
    power: lvp_core::Power,
    mut labels: std::collections::HashMap<String, String>,
    annotations: std::collections::HashMap<String, String>,
    image: Option<String>,
    ignition: Option<Vec<u8>>,
    guest_agent: lvp_core::GuestAgentType,
    volumes: Vec<lvp_core::VolumeSpec>,
    network_interfaces: Vec<lvp_core::NetworkInterfaceSpec>,
) -> CoreResult<Response> {
    let Some(machine_class) = ctx.machine_classes.get(&class) else {
        return Err(CoreError::InvalidRequest(format!("unknown machine class {class}")));
    };

    let mut spec = MachineSpec::new(power, machine_class.cpu, machine_class.memory_bytes);
    spec.image = image;
    spec.ignition = ignition;
    spec.guest_agent = guest_agent;
    spec.volumes = volumes;
    spec.network_interfaces = network_interfaces;

    let mut machine = Machine::new(spec);
    labels.insert("class".to_string(), class);
    labels.insert(MANAGER_LABEL.to_string(), MANAGER_NAME.to_string());
    machine.labels = labels;
    machine.annotations = annotations;

    let created = ctx.store.create(machine, &MachineCreateStrategy)?;
    Ok(Response::Machine { machine: Box::new(created) })
}

fn list_machines(ctx: &ListenCtx, id: Option<MachineId>, label_selector: Selector) -> CoreResult<Response> {
    if let Some(id) = id {
        let machine = ctx.store.get(&id)?;
        return Ok(Response::Machines { machines: vec![machine] });
    }

    let machines = ctx
        .store
        .list()
        .into_iter()
        .filter(|m| m.labels.contains_key(MANAGER_LABEL))
        .filter(|m| lvp_core::selector_matches(&m.labels, &label_selector))
        .collect();
    Ok(Response::Machines { machines })
}

/// Reserves one concurrent console per Machine (§4.10, §5); the actual
/// console byte stream is out of scope here.
fn exec(ctx: &ListenCtx, id: MachineId) -> CoreResult<Response> {
    ctx.store.get(&id)?;

    let mut active = ctx.active_consoles.lock();
    if !active.insert(id) {
        return Err(CoreError::FailedPrecondition(format!("console already active for {id}")));
    }

    Ok(Response::Exec {
        handle: lvp_wire::ExecHandle { url: format!("unix-console://{id}"), token: Uuid::new_v4().to_string() },
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use lvp_core::{GuestAgentType, Power};

    use super::*;

    fn ctx() -> (tempfile::TempDir, ListenCtx) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(ObjectStore::open(tmp.path().join("store")).unwrap());
        let events = Arc::new(EventStore::default());
        (tmp, ListenCtx::new(store, events, Arc::new(write_classes_file(tmp.path()))))
    }

    fn write_classes_file(dir: &std::path::Path) -> MachineClassSet {
        let path = dir.join("classes.toml");
        std::fs::write(&path, "[[classes]]\nname = \"standard-2\"\ncpu = 2\nmemory_bytes = 4294967296\n").unwrap();
        MachineClassSet::load(&path).unwrap()
    }

    #[test]
    fn create_machine_rejects_unknown_class() {
        let (_tmp, ctx) = ctx();
        let err = create_machine(
            &ctx,
            "nonexistent".to_string(),
            Power::On,
            HashMap::new(),
            HashMap::new(),
            None,
            None,
            GuestAgentType::None,
            Vec::new(),
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
    }

    #[test]
    fn create_machine_stamps_class_and_manager_labels() {
        let (_tmp, ctx) = ctx();
        let response = create_machine(
            &ctx,
            "standard-2".to_string(),
            Power::On,
            HashMap::new(),
            HashMap::new(),
            None,
            None,
            GuestAgentType::None,
            Vec::new(),
            Vec::new(),
        )
        .unwrap();
        let Response::Machine { machine } = response else { panic!("expected Machine response") };
        assert_eq!(machine.labels.get("class"), Some(&"standard-2".to_string()));
        assert_eq!(machine.labels.get(MANAGER_LABEL), Some(&MANAGER_NAME.to_string()));
        assert_eq!(machine.spec.cpu, 2);
    }

    #[test]
    fn list_machines_only_returns_managed_records() {
        let (_tmp, ctx) = ctx();
        create_machine(
            &ctx,
            "standard-2".to_string(),
            Power::On,
            HashMap::new(),
            HashMap::new(),
            None,
            None,
            GuestAgentType::None,
            Vec::new(),
            Vec::new(),
        )
        .unwrap();

        let unmanaged = Machine::new(MachineSpec::new(Power::On, 1, 1));
        ctx.store.create(unmanaged, &MachineCreateStrategy).unwrap();

        let Response::Machines { machines } = list_machines(&ctx, None, Selector::new()).unwrap() else {
            panic!("expected Machines response")
        };
        assert_eq!(machines.len(), 1);
    }

    #[test]
    fn exec_rejects_a_second_concurrent_console() {
        let (_tmp, ctx) = ctx();
        let Response::Machine { machine } = create_machine(
            &ctx,
            "standard-2".to_string(),
            Power::On,
            HashMap::new(),
            HashMap::new(),
            None,
            None,
            GuestAgentType::None,
            Vec::new(),
            Vec::new(),
        )
        .unwrap() else {
            panic!("expected Machine response")
        };

        exec(&ctx, machine.id).unwrap();
        let err = exec(&ctx, machine.id).unwrap_err();
        assert!(matches!(err, CoreError::FailedPrecondition(_)));
    }
}
