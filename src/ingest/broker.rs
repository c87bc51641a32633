//! MQTT transport feeding uplinks into the service.

use crate::config::BrokerSettings;
use crate::service::VentilationService;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const REQUEST_CAPACITY: usize = 32;

pub fn mqtt_options(settings: &BrokerSettings) -> MqttOptions {
    let mut opts = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    opts.set_keep_alive(settings.keep_alive);

    if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
        opts.set_credentials(user, pass);
    }
    if settings.tls {
        opts.set_transport(Transport::tls_with_default_config());
    }
    opts
}

pub fn connect(settings: &BrokerSettings) -> (AsyncClient, EventLoop) {
    AsyncClient::new(mqtt_options(settings), REQUEST_CAPACITY)
}

/// Polls the broker until `shutdown` flips. Connection errors are retried
/// after the configured delay; rumqttc reconnects on the next poll.
pub async fn run_broker_loop(
    settings: BrokerSettings,
    service: Arc<VentilationService>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (client, mut eventloop) = connect(&settings);
    info!(
        host = %settings.host,
        port = settings.port,
        tls = settings.tls,
        "Connecting to MQTT broker"
    );

    loop {
        tokio::select! {
            event = eventloop.poll() => match event {
                Ok(event) => dispatch(&event, &client, &service).await,
                Err(err) => {
                    warn!(error = %err, "MQTT connection error");
                    tokio::select! {
                        _ = tokio::time::sleep(settings.reconnect_delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            },
            _ = shutdown.changed() => break,
        }
    }
    info!("MQTT loop stopped");
}

pub(crate) async fn dispatch(event: &Event, client: &AsyncClient, service: &VentilationService) {
    match event {
        Event::Incoming(Packet::ConnAck(ack)) => {
            info!(session_present = ack.session_present, "Connected to MQTT broker");
            for topic in service.settings().routes.all() {
                match client.try_subscribe(topic, QoS::AtLeastOnce) {
                    Ok(()) => debug!(topic, "Subscribed"),
                    Err(err) => warn!(topic, error = %err, "Subscribe failed"),
                }
            }
            if service.ensure_engine_running() {
                info!("Prediction engine (re)started after broker connect");
            }
        }
        Event::Incoming(Packet::Publish(publish)) => {
            debug!(topic = %publish.topic, bytes = publish.payload.len(), "Uplink received");
            service.ingest(&publish.topic, &publish.payload).await;
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::TopicRoutes;
    use crate::prediction::ModelSet;
    use crate::query::PollPolicy;
    use crate::service::ServiceSettings;
    use crate::store::Persistence;
    use crate::store::memory::MemoryStore;
    use rumqttc::{ConnAck, ConnectReturnCode, Publish};
    use std::time::Duration;

    fn broker_settings() -> BrokerSettings {
        BrokerSettings {
            host: "broker.local".to_string(),
            port: 1883,
            client_id: "room-209".to_string(),
            username: Some("user".to_string()),
            password: Some("secret".to_string()),
            tls: false,
            keep_alive: Duration::from_secs(45),
            reconnect_delay: Duration::from_secs(5),
        }
    }

    fn service(store: &MemoryStore) -> VentilationService {
        VentilationService::new(
            Persistence::new(Box::new(store.clone()), "2.09"),
            ModelSet::with_defaults("Logistic Regression", "Random Forest"),
            ServiceSettings {
                routes: TopicRoutes {
                    climate: "room/climate".to_string(),
                    tvoc: "room/tvoc".to_string(),
                    ambient: "room/ambient".to_string(),
                },
                timezone: chrono_tz::Europe::Berlin,
                prediction_interval: Duration::from_secs(600),
                poll: PollPolicy::default(),
            },
        )
    }

    #[test]
    fn options_follow_settings() {
        let opts = mqtt_options(&broker_settings());

        assert_eq!(opts.broker_address(), ("broker.local".to_string(), 1883));
        assert_eq!(opts.keep_alive(), Duration::from_secs(45));
        assert_eq!(opts.client_id(), "room-209");
    }

    #[tokio::test]
    async fn connack_starts_the_engine() {
        let store = MemoryStore::new();
        let service = service(&store);
        let (client, _eventloop) = connect(&broker_settings());
        let ack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
        }));

        dispatch(&ack, &client, &service).await;

        assert!(service.engine_running());
        service.shutdown().await;
    }

    #[tokio::test]
    async fn publish_is_ingested() {
        let store = MemoryStore::new();
        let service = service(&store);
        let (client, _eventloop) = connect(&broker_settings());
        let publish = Event::Incoming(Packet::Publish(Publish::new(
            "room/climate",
            QoS::AtLeastOnce,
            r#"{"time": "2024-05-06T08:15:42Z", "object": {"temperature": 21.0, "humidity": 40.0, "co2": 700.0}}"#,
        )));

        dispatch(&publish, &client, &service).await;

        assert_eq!(store.readings().len(), 1);
    }
}
