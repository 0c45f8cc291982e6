//! TCP stand-in for the BLE peripheral. Each client sees every
//! characteristic as a stream of `[id][len][value]` records: current values
//! are replayed on connect and notifications follow as they happen. A
//! connected client counts as a subscribed central.

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::Context;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc},
};
use tracing::{debug, info, warn};

use ortus_common::{
    gatt::{CONTROL_SERVICE_UUID, IMPROV_SERVICE_UUID},
    BridgeRecord, Characteristic, ProvisioningPort, RadioLink, RecordDecoder,
};

const NOTIFY_BACKLOG: usize = 32;

#[derive(Clone)]
struct BridgeHub {
    latest: Arc<Mutex<BTreeMap<u8, BridgeRecord>>>,
    notify: broadcast::Sender<BridgeRecord>,
    clients: Arc<AtomicUsize>,
}

impl BridgeHub {
    fn publish(&self, characteristic: Characteristic, value: &[u8]) {
        let record = BridgeRecord::new(characteristic, value);
        if let Ok(mut latest) = self.latest.lock() {
            latest.insert(characteristic.id(), record.clone());
        }
        // No receivers just means no client is connected.
        let _ = self.notify.send(record);
    }

    fn snapshot(&self) -> Vec<BridgeRecord> {
        self.latest
            .lock()
            .map(|latest| latest.values().cloned().collect())
            .unwrap_or_default()
    }

    fn client_count(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }
}

/// Loop-side end of the provisioning service.
pub struct ProvisioningChannel {
    writes: mpsc::UnboundedReceiver<Vec<u8>>,
    hub: BridgeHub,
}

impl ProvisioningPort for ProvisioningChannel {
    fn poll_write(&mut self) -> Option<Vec<u8>> {
        self.writes.try_recv().ok()
    }

    fn publish(&mut self, characteristic: Characteristic, value: &[u8]) {
        self.hub.publish(characteristic, value);
    }
}

/// Loop-side end of the control service.
pub struct ControlChannel {
    writes: mpsc::UnboundedReceiver<Vec<u8>>,
    hub: BridgeHub,
}

impl RadioLink for ControlChannel {
    fn poll_control_write(&mut self) -> Option<Vec<u8>> {
        self.writes.try_recv().ok()
    }

    fn has_subscriber(&self) -> bool {
        self.hub.client_count() > 0
    }

    fn notify_device_state(&mut self, value: &[u8]) {
        self.hub.publish(Characteristic::DeviceState, value);
    }
}

pub struct RadioBridge {
    pub local_addr: SocketAddr,
    pub provisioning: ProvisioningChannel,
    pub control: ControlChannel,
}

#[derive(Clone)]
struct WriteRoutes {
    rpc: mpsc::UnboundedSender<Vec<u8>>,
    control: mpsc::UnboundedSender<Vec<u8>>,
}

impl WriteRoutes {
    fn route(&self, record: BridgeRecord) {
        let characteristic = record.characteristic;
        if !characteristic.is_writable() {
            warn!(
                ?characteristic,
                uuid = characteristic.uuid(),
                "write to read-only characteristic ignored"
            );
            return;
        }
        let sent = if characteristic == Characteristic::RpcCommand {
            self.rpc.send(record.value)
        } else {
            self.control.send(record.value)
        };
        if sent.is_err() {
            debug!("device loop gone; dropping radio write");
        }
    }
}

impl RadioBridge {
    /// Binds the listener and starts accepting clients in the background.
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind radio bridge at {addr}"))?;
        let local_addr = listener.local_addr()?;

        let (notify, _) = broadcast::channel(NOTIFY_BACKLOG);
        let hub = BridgeHub {
            latest: Arc::new(Mutex::new(BTreeMap::new())),
            notify,
            clients: Arc::new(AtomicUsize::new(0)),
        };
        let (rpc_tx, rpc_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let routes = WriteRoutes {
            rpc: rpc_tx,
            control: control_tx,
        };

        spawn_accept_loop(listener, hub.clone(), routes);
        info!(
            %local_addr,
            improv = IMPROV_SERVICE_UUID,
            control = CONTROL_SERVICE_UUID,
            "radio services advertised"
        );

        Ok(Self {
            local_addr,
            provisioning: ProvisioningChannel {
                writes: rpc_rx,
                hub: hub.clone(),
            },
            control: ControlChannel {
                writes: control_rx,
                hub,
            },
        })
    }
}

fn spawn_accept_loop(listener: TcpListener, hub: BridgeHub, routes: WriteRoutes) {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let hub = hub.clone();
                    let routes = routes.clone();
                    tokio::spawn(async move {
                        let notifications = hub.notify.subscribe();
                        hub.clients.fetch_add(1, Ordering::Relaxed);
                        info!(%peer, "radio client connected");
                        if let Err(err) = serve_client(stream, notifications, &hub, &routes).await
                        {
                            warn!(%peer, "radio client error: {err:#}");
                        }
                        hub.clients.fetch_sub(1, Ordering::Relaxed);
                        info!(%peer, "radio client disconnected");
                    });
                }
                Err(err) => warn!("radio bridge accept failed: {err}"),
            }
        }
    });
}

async fn serve_client(
    mut stream: TcpStream,
    mut notifications: broadcast::Receiver<BridgeRecord>,
    hub: &BridgeHub,
    routes: &WriteRoutes,
) -> anyhow::Result<()> {
    let (mut reader, mut writer) = stream.split();

    for record in hub.snapshot() {
        writer.write_all(&record.encode()).await?;
    }
    writer.flush().await?;

    let mut decoder = RecordDecoder::new();
    let mut buf = [0u8; 256];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    return Ok(());
                }
                decoder.push(&buf[..n]);
                while let Some(record) = decoder.next_record() {
                    routes.route(record);
                }
            }
            notified = notifications.recv() => match notified {
                Ok(record) => {
                    writer.write_all(&record.encode()).await?;
                    writer.flush().await?;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "radio client fell behind; notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
        }
    }
}
