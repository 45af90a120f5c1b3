// Client library against a live server over loopback.
use anyhow::Result;
use conparam_client::ParamClient;
use conparam_wire::{Params, Value};
use paramd::config::ServerConfig;
use paramd::server::ServerHandle;
use std::time::Duration;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(2);

async fn start_server() -> Result<ServerHandle> {
    ServerHandle::start(ServerConfig {
        udp_bind: "127.0.0.1:0".parse()?,
        ..ServerConfig::default()
    })
    .await
}

async fn wait_for_value(client: &ParamClient, key: &str, expected: &Value) {
    timeout(WAIT, async {
        while client.get(key).as_ref() != Some(expected) {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("value not mirrored in time");
}

async fn wait_for_members(server: &ServerHandle, namespace: &str, count: usize) {
    timeout(WAIT, async {
        while server.store().subscribers(namespace).len() != count {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("registrations not applied in time");
}

#[tokio::test]
async fn set_on_one_client_reaches_the_other() -> Result<()> {
    let server = start_server().await?;
    let mut defaults = Params::new();
    defaults.insert("param1".into(), Value::from("value1"));

    let writer = ParamClient::connect(server.local_addr(), "test", defaults.clone()).await?;
    let reader = ParamClient::connect(server.local_addr(), "test", defaults).await?;
    wait_for_members(&server, "test", 2).await;

    writer.set("param1", Value::from("value1 updated")).await?;
    wait_for_value(&reader, "param1", &Value::from("value1 updated")).await;
    assert_eq!(writer.get("param1"), Some(Value::from("value1 updated")));
    Ok(())
}

#[tokio::test]
async fn late_joiner_receives_snapshot() -> Result<()> {
    let server = start_server().await?;
    let early = ParamClient::connect(server.local_addr(), "lab", Params::new()).await?;
    wait_for_members(&server, "lab", 1).await;

    early.set("param2", Value::from(4)).await?;
    timeout(WAIT, async {
        while server.store().get_parameter("lab", "param2").is_none() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;

    let late = ParamClient::connect(server.local_addr(), "lab", Params::new()).await?;
    let value = late.wait_for("param2", WAIT).await?;
    assert_eq!(value, Value::from(4));
    Ok(())
}

#[tokio::test]
async fn clients_in_other_namespaces_stay_untouched() -> Result<()> {
    let server = start_server().await?;
    let red = ParamClient::connect(server.local_addr(), "red", Params::new()).await?;
    let red_peer = ParamClient::connect(server.local_addr(), "red", Params::new()).await?;
    let blue = ParamClient::connect(server.local_addr(), "blue", Params::new()).await?;
    wait_for_members(&server, "red", 2).await;
    wait_for_members(&server, "blue", 1).await;

    red.set("hue", Value::from(0)).await?;
    wait_for_value(&red_peer, "hue", &Value::from(0)).await;
    assert!(blue.wait_for("hue", Duration::from_millis(150)).await.is_err());
    Ok(())
}
