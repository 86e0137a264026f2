// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Hypervisor` trait abstracts the libvirt connection so the domain
//! builder/attacher/image cache can be tested without a running libvirtd.
//! [`VirtHypervisor`] is the `virt`-backed implementation; every call is
//! blocking C FFI under the hood, so it is dispatched through
//! `tokio::task::spawn_blocking`.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;
use virt::connect::Connect;
use virt::domain::Domain;
use virt::sys::{
    VIR_DOMAIN_AFFECT_LIVE, VIR_DOMAIN_DESTROY_GRACEFUL, VIR_DOMAIN_EVENT_ID_LIFECYCLE,
    VIR_DOMAIN_SHUTDOWN_ACPI_POWER_BTN, VIR_DOMAIN_SHUTDOWN_GUEST_AGENT, VIR_DOMAIN_START_VALIDATE,
    VIR_DOMAIN_UNDEFINE_KEEP_NVRAM,
};

use crate::domain::capability::GuestCapability;
use crate::error::{LibvirtError, LibvirtResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainRunState {
    Pending,
    Running,
    Terminating,
    Terminated,
}

/// Mirrors libvirt's `virDomainState` values this system distinguishes
/// between (§4.9's reconcile state-mapping table).
fn map_domain_state(raw: i32) -> DomainRunState {
    use virt::sys::{
        VIR_DOMAIN_BLOCKED, VIR_DOMAIN_NOSTATE, VIR_DOMAIN_PAUSED, VIR_DOMAIN_PMSUSPENDED,
        VIR_DOMAIN_RUNNING, VIR_DOMAIN_SHUTDOWN, VIR_DOMAIN_SHUTOFF,
    };
    match raw as u32 {
        VIR_DOMAIN_NOSTATE | VIR_DOMAIN_BLOCKED | VIR_DOMAIN_PAUSED | VIR_DOMAIN_PMSUSPENDED => {
            DomainRunState::Pending
        }
        VIR_DOMAIN_RUNNING => DomainRunState::Running,
        VIR_DOMAIN_SHUTDOWN => DomainRunState::Terminating,
        VIR_DOMAIN_SHUTOFF => DomainRunState::Terminated,
        _ => DomainRunState::Pending,
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ShutdownMode {
    AcpiPowerBtn,
    GuestAgent,
}

/// Lifecycle event delivered from libvirt's event loop, carrying the domain
/// UUID the reconciler's event-ingestion task matches against stored
/// Machines (§4.9 "Event ingestion").
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub domain_uuid: Uuid,
}

#[async_trait]
pub trait Hypervisor: Send + Sync + 'static {
    async fn capabilities(&self) -> LibvirtResult<Vec<GuestCapability>>;
    async fn domain_exists(&self, uuid: Uuid) -> LibvirtResult<bool>;
    async fn domain_xml(&self, uuid: Uuid) -> LibvirtResult<Option<String>>;
    async fn domain_state(&self, uuid: Uuid) -> LibvirtResult<Option<DomainRunState>>;
    async fn create_xml(&self, xml: String) -> LibvirtResult<()>;
    async fn attach_device(&self, uuid: Uuid, device_xml: String) -> LibvirtResult<()>;
    async fn detach_device(&self, uuid: Uuid, device_xml: String) -> LibvirtResult<()>;
    async fn block_resize(&self, uuid: Uuid, target_dev: String, bytes: u64) -> LibvirtResult<()>;
    async fn shutdown(&self, uuid: Uuid, mode: ShutdownMode) -> LibvirtResult<()>;
    async fn destroy(&self, uuid: Uuid) -> LibvirtResult<()>;
    async fn secret_define(&self, secret_uuid: Uuid, secret_xml: String) -> LibvirtResult<()>;
    async fn secret_set_value(&self, secret_uuid: Uuid, value: Vec<u8>) -> LibvirtResult<()>;
    async fn secret_undefine(&self, secret_uuid: Uuid) -> LibvirtResult<()>;

    /// Subscribe to domain lifecycle events (§4.9 "Event ingestion"). The
    /// channel closes once the subscription ends; callers should log and
    /// exit their ingestion task rather than resubscribe.
    fn subscribe_lifecycle_events(&self) -> mpsc::Receiver<LifecycleEvent>;
}

pub struct VirtHypervisor {
    connect: Arc<Mutex<Connect>>,
    uri: String,
}

impl VirtHypervisor {
    pub fn open(uri: &str) -> LibvirtResult<Self> {
        virt::event::register_default_impl().map_err(|e| LibvirtError::Hypervisor(e.to_string()))?;
        let connect = Connect::open(Some(uri)).map_err(|e| LibvirtError::Hypervisor(e.to_string()))?;
        Ok(Self { connect: Arc::new(Mutex::new(connect)), uri: uri.to_string() })
    }

    fn lookup(connect: &Connect, uuid: Uuid) -> LibvirtResult<Option<Domain>> {
        match Domain::lookup_by_uuid_string(connect, &uuid.to_string()) {
            Ok(domain) => Ok(Some(domain)),
            Err(e) if e.code() == virt::error::ErrorNumber::NoDomain => Ok(None),
            Err(e) => Err(LibvirtError::Hypervisor(e.to_string())),
        }
    }

    /// Run `f` against the connection on a blocking thread; libvirt's client
    /// calls are synchronous FFI and must never run on the async executor.
    async fn dispatch<F, T>(&self, f: F) -> LibvirtResult<T>
    where
        F: FnOnce(&Connect) -> LibvirtResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let connect = self.connect.clone();
        tokio::task::spawn_blocking(move || {
            let guard = connect.lock();
            f(&guard)
        })
        .await
        .map_err(|e| LibvirtError::Hypervisor(format!("blocking task panicked: {e}")))?
    }
}

#[async_trait]
impl Hypervisor for VirtHypervisor {
    async fn capabilities(&self) -> LibvirtResult<Vec<GuestCapability>> {
        self.dispatch(|connect| {
            let xml = connect.get_capabilities().map_err(|e| LibvirtError::Hypervisor(e.to_string()))?;
            crate::domain::capability::parse_capabilities_xml(&xml)
        })
        .await
    }

    async fn domain_exists(&self, uuid: Uuid) -> LibvirtResult<bool> {
        self.dispatch(move |connect| Ok(Self::lookup(connect, uuid)?.is_some())).await
    }

    async fn domain_xml(&self, uuid: Uuid) -> LibvirtResult<Option<String>> {
        self.dispatch(move |connect| match Self::lookup(connect, uuid)? {
            Some(domain) => {
                let xml = domain.get_xml_desc(0).map_err(|e| LibvirtError::Hypervisor(e.to_string()))?;
                Ok(Some(xml))
            }
            None => Ok(None),
        })
        .await
    }

    async fn domain_state(&self, uuid: Uuid) -> LibvirtResult<Option<DomainRunState>> {
        self.dispatch(move |connect| match Self::lookup(connect, uuid)? {
            Some(domain) => {
                let (state, _reason) =
                    domain.get_state().map_err(|e| LibvirtError::Hypervisor(e.to_string()))?;
                Ok(Some(map_domain_state(state as i32)))
            }
            None => Ok(None),
        })
        .await
    }

    async fn create_xml(&self, xml: String) -> LibvirtResult<()> {
        self.dispatch(move |connect| {
            Domain::create_xml(connect, &xml, VIR_DOMAIN_START_VALIDATE)
                .map_err(|e| LibvirtError::Hypervisor(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn attach_device(&self, uuid: Uuid, device_xml: String) -> LibvirtResult<()> {
        self.dispatch(move |connect| match Self::lookup(connect, uuid)? {
            Some(domain) => domain
                .attach_device_flags(&device_xml, VIR_DOMAIN_AFFECT_LIVE)
                .map_err(|e| LibvirtError::Hypervisor(e.to_string())),
            None => Err(LibvirtError::DomainNotFound(uuid.to_string())),
        })
        .await
    }

    async fn detach_device(&self, uuid: Uuid, device_xml: String) -> LibvirtResult<()> {
        self.dispatch(move |connect| match Self::lookup(connect, uuid)? {
            Some(domain) => domain
                .detach_device_flags(&device_xml, VIR_DOMAIN_AFFECT_LIVE)
                .map_err(|e| LibvirtError::Hypervisor(e.to_string())),
            None => Err(LibvirtError::DomainNotFound(uuid.to_string())),
        })
        .await
    }

    async fn block_resize(&self, uuid: Uuid, target_dev: String, bytes: u64) -> LibvirtResult<()> {
        self.dispatch(move |connect| match Self::lookup(connect, uuid)? {
            Some(domain) => domain
                .block_resize(&target_dev, bytes, 0)
                .map_err(|e| LibvirtError::Hypervisor(e.to_string())),
            None => Err(LibvirtError::DomainNotFound(uuid.to_string())),
        })
        .await
    }

    async fn shutdown(&self, uuid: Uuid, mode: ShutdownMode) -> LibvirtResult<()> {
        let flag = match mode {
            ShutdownMode::AcpiPowerBtn => VIR_DOMAIN_SHUTDOWN_ACPI_POWER_BTN,
            ShutdownMode::GuestAgent => VIR_DOMAIN_SHUTDOWN_GUEST_AGENT,
        };
        self.dispatch(move |connect| match Self::lookup(connect, uuid)? {
            Some(domain) => domain.shutdown_flags(flag).map_err(|e| LibvirtError::Hypervisor(e.to_string())),
            None => Err(LibvirtError::DomainNotFound(uuid.to_string())),
        })
        .await
    }

    async fn destroy(&self, uuid: Uuid) -> LibvirtResult<()> {
        self.dispatch(move |connect| match Self::lookup(connect, uuid)? {
            Some(domain) => domain
                .destroy_flags(VIR_DOMAIN_DESTROY_GRACEFUL)
                .map_err(|e| LibvirtError::Hypervisor(e.to_string())),
            None => Err(LibvirtError::DomainNotFound(uuid.to_string())),
        })
        .await
    }

    async fn secret_define(&self, secret_uuid: Uuid, secret_xml: String) -> LibvirtResult<()> {
        let _ = secret_uuid;
        self.dispatch(move |connect| {
            virt::secret::Secret::define_xml(connect, &secret_xml, 0)
                .map_err(|e| LibvirtError::Hypervisor(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn secret_set_value(&self, secret_uuid: Uuid, value: Vec<u8>) -> LibvirtResult<()> {
        self.dispatch(move |connect| {
            let secret = virt::secret::Secret::lookup_by_uuid_string(connect, &secret_uuid.to_string())
                .map_err(|e| LibvirtError::NoSecret(e.to_string()))?;
            secret.set_value(&value, 0).map_err(|e| LibvirtError::Hypervisor(e.to_string()))
        })
        .await
    }

    async fn secret_undefine(&self, secret_uuid: Uuid) -> LibvirtResult<()> {
        self.dispatch(move |connect| {
            match virt::secret::Secret::lookup_by_uuid_string(connect, &secret_uuid.to_string()) {
                Ok(secret) => {
                    secret.undefine().map_err(|e| LibvirtError::Hypervisor(e.to_string()))?;
                    let _ = VIR_DOMAIN_UNDEFINE_KEEP_NVRAM;
                    Ok(())
                }
                Err(_) => Ok(()),
            }
        })
        .await
    }

    /// Registration blocks on libvirt's event loop forever, so it runs on
    /// its own dedicated connection and OS thread rather than sharing
    /// `self.connect`'s mutex with the one-shot RPC calls.
    fn subscribe_lifecycle_events(&self) -> mpsc::Receiver<LifecycleEvent> {
        let (tx, rx) = mpsc::channel(256);
        let uri = self.uri.clone();
        std::thread::spawn(move || {
            let Ok(connect) = Connect::open(Some(&uri)) else { return };
            let cb_tx = tx.clone();
            let registered = connect.domain_event_register_any(
                None,
                VIR_DOMAIN_EVENT_ID_LIFECYCLE,
                Box::new(move |_connect, domain, _event, _detail| {
                    if let Ok(uuid_str) = domain.get_uuid_string() {
                        if let Ok(domain_uuid) = Uuid::parse_str(&uuid_str) {
                            let _ = cb_tx.blocking_send(LifecycleEvent { domain_uuid });
                        }
                    }
                }),
            );
            if registered.is_err() {
                return;
            }
            while virt::event::run_default_impl().is_ok() {}
        });
        rx
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use std::collections::HashMap;

    use super::*;

    /// In-memory `Hypervisor` used by domain-builder/attacher unit tests;
    /// keeps a descriptor-less registry of domain XML and defined secrets.
    #[derive(Default)]
    pub struct FakeHypervisor {
        pub domains: Mutex<HashMap<Uuid, String>>,
        pub secrets: Mutex<HashMap<Uuid, Vec<u8>>>,
        pub capabilities: Mutex<Vec<GuestCapability>>,
        lifecycle_tx: Mutex<Option<mpsc::Sender<LifecycleEvent>>>,
    }

    impl FakeHypervisor {
        /// Deliver a lifecycle event to whoever last called
        /// `subscribe_lifecycle_events`; a no-op if nobody has subscribed.
        pub fn emit_lifecycle_event(&self, domain_uuid: Uuid) {
            if let Some(tx) = self.lifecycle_tx.lock().as_ref() {
                let _ = tx.try_send(LifecycleEvent { domain_uuid });
            }
        }
    }

    #[async_trait]
    impl Hypervisor for FakeHypervisor {
        async fn capabilities(&self) -> LibvirtResult<Vec<GuestCapability>> {
            Ok(self.capabilities.lock().clone())
        }

        async fn domain_exists(&self, uuid: Uuid) -> LibvirtResult<bool> {
            Ok(self.domains.lock().contains_key(&uuid))
        }

        async fn domain_xml(&self, uuid: Uuid) -> LibvirtResult<Option<String>> {
            Ok(self.domains.lock().get(&uuid).cloned())
        }

        async fn domain_state(&self, uuid: Uuid) -> LibvirtResult<Option<DomainRunState>> {
            Ok(self.domains.lock().get(&uuid).map(|_| DomainRunState::Running))
        }

        async fn create_xml(&self, xml: String) -> LibvirtResult<()> {
            let descriptor = crate::domain::DomainDescriptor::from_xml(&xml)?;
            self.domains.lock().insert(descriptor.uuid, xml);
            Ok(())
        }

        async fn attach_device(&self, _uuid: Uuid, _device_xml: String) -> LibvirtResult<()> {
            Ok(())
        }

        async fn detach_device(&self, _uuid: Uuid, _device_xml: String) -> LibvirtResult<()> {
            Ok(())
        }

        async fn block_resize(&self, _uuid: Uuid, _target_dev: String, _bytes: u64) -> LibvirtResult<()> {
            Ok(())
        }

        async fn shutdown(&self, uuid: Uuid, _mode: ShutdownMode) -> LibvirtResult<()> {
            if self.domains.lock().remove(&uuid).is_none() {
                return Err(LibvirtError::DomainNotFound(uuid.to_string()));
            }
            Ok(())
        }

        async fn destroy(&self, uuid: Uuid) -> LibvirtResult<()> {
            if self.domains.lock().remove(&uuid).is_none() {
                return Err(LibvirtError::DomainNotFound(uuid.to_string()));
            }
            Ok(())
        }

        async fn secret_define(&self, secret_uuid: Uuid, _secret_xml: String) -> LibvirtResult<()> {
            self.secrets.lock().entry(secret_uuid).or_default();
            Ok(())
        }

        async fn secret_set_value(&self, secret_uuid: Uuid, value: Vec<u8>) -> LibvirtResult<()> {
            self.secrets.lock().insert(secret_uuid, value);
            Ok(())
        }

        async fn secret_undefine(&self, secret_uuid: Uuid) -> LibvirtResult<()> {
            self.secrets.lock().remove(&secret_uuid);
            Ok(())
        }

        fn subscribe_lifecycle_events(&self) -> mpsc::Receiver<LifecycleEvent> {
            let (tx, rx) = mpsc::channel(256);
            *self.lifecycle_tx.lock() = Some(tx);
            rx
        }
    }
}
