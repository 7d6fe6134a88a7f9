//! Plain-text HTTP facade over the two pools.

use crate::devices::DevicePool;
use crate::nodes::NodePool;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use common::{parse_node_port, Inventory};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::debug;

type Rejection = (StatusCode, String);

#[derive(Clone)]
pub struct AppState {
    pub devices: Arc<DevicePool>,
    pub nodes: Arc<NodePool>,
    /// Base URL printed in the help page.
    pub base_url: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(help))
        .route("/getDevice", get(get_device))
        .route("/releaseDevice", get(release_device))
        .route("/getAppium", get(get_appium))
        .route("/releaseAppium", get(release_appium))
        .route("/rereadDevices", get(reread_devices))
        .route("/isAllFree", get(is_all_free))
        .route("/status", get(status))
        .route("/list", get(list))
        .route("/forceCleanUp", get(force_clean_up))
        .route("/wipeAppiumTools", get(wipe_appium_tools))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `http://<lan ip>:<port>`. Connecting a UDP socket sends nothing but makes
/// the OS pick the outbound interface.
pub fn advertised_base_url(port: u16) -> String {
    let ip = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect(("8.8.8.8", 80))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or_else(|err| {
            debug!(error = %err, "ip autodetect failed, using localhost");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        });
    format!("http://{}:{}", ip, port)
}

fn param<'a>(
    params: &'a HashMap<String, String>,
    name: &str,
    usage: &str,
) -> Result<&'a str, Rejection> {
    params
        .get(name)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                format!("INCORRECT REQUEST\nExpected form:\n{}", usage),
            )
        })
}

async fn help(State(state): State<AppState>) -> String {
    let base = &state.base_url;
    let rule = "=".repeat(59);
    [
        "You can use these commands".to_string(),
        rule.clone(),
        format!("{}/getDevice", base),
        format!("{}/releaseDevice?name={{deviceName}}", base),
        format!("{}/getAppium", base),
        format!("{}/releaseAppium?url={{appiumUrl}}", base),
        format!("{}/rereadDevices", base),
        format!("{}/isAllFree", base),
        format!("{}/status", base),
        format!("{}/list", base),
        format!("{}/forceCleanUp", base),
        format!("{}/wipeAppiumTools?name={{deviceName}}", base),
        rule,
    ]
    .join("\n")
}

async fn get_device(State(state): State<AppState>) -> String {
    state.devices.allocate().await.to_string()
}

async fn release_device(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<String, Rejection> {
    let serial = param(&params, "name", "/releaseDevice?name={deviceName}")?;
    Ok(state.devices.release(serial).to_string())
}

async fn get_appium(State(state): State<AppState>) -> String {
    state.nodes.allocate().await.to_string()
}

async fn release_appium(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<String, Rejection> {
    let usage = "/releaseAppium?url={appiumUrl}";
    let address = param(&params, "url", usage).or_else(|_| param(&params, "port", usage))?;
    let port = parse_node_port(address).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!("INCORRECT REQUEST\nNot an Appium address: {}", address),
        )
    })?;
    Ok(state.nodes.release(port).to_string())
}

async fn reread_devices(State(state): State<AppState>) -> String {
    let serials = state.devices.refresh().await;
    let rule = "-".repeat(28);
    let mut page = format!("Actual devices list:\n{}\n", rule);
    for serial in serials {
        page.push_str(&format!("| {:<25}|\n", serial));
    }
    page.push_str(&rule);
    page
}

async fn is_all_free(State(state): State<AppState>) -> String {
    (state.devices.is_all_free() && state.nodes.is_all_free()).to_string()
}

async fn status(State(state): State<AppState>) -> String {
    let devices = state.devices.status_text();
    let nodes = state.nodes.status_text().await;
    let rule = "═".repeat(48);
    format!(
        "╔{rule}\n║ DEVICES\n╠{rule}\n{devices}╠{rule}\n║ APPIUM NODES\n╠{rule}\n{nodes}╚{rule}"
    )
}

async fn list(State(state): State<AppState>) -> Json<Inventory> {
    Json(Inventory {
        devices: state.devices.snapshot(),
        nodes: state.nodes.snapshot(),
    })
}

async fn force_clean_up(State(state): State<AppState>) -> String {
    tokio::join!(state.nodes.force_clean_up(), async {
        state.devices.force_clean_up()
    });
    common::OK.to_string()
}

async fn wipe_appium_tools(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<String, Rejection> {
    let serial = param(&params, "name", "/wipeAppiumTools?name={deviceName}")?;
    Ok(state
        .devices
        .wipe_automation_tools(serial)
        .await
        .unwrap_or_else(|| common::UNKNOWN.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertised_url_always_has_scheme_and_port() {
        let url = advertised_base_url(9093);
        assert!(url.starts_with("http://"));
        assert!(url.ends_with(":9093"));
    }

    #[test]
    fn missing_param_is_a_bad_request() {
        let params = HashMap::from([("name".to_string(), "  ".to_string())]);
        let (status, body) = param(&params, "name", "/releaseDevice?name={deviceName}").unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.ends_with("/releaseDevice?name={deviceName}"));
        let params = HashMap::from([("name".to_string(), "X".to_string())]);
        assert_eq!(param(&params, "name", "").unwrap(), "X");
    }
}
