use crate::errors::RequestError;
use crate::monitor::{Monitor, DEFAULT_INTERVAL_MINUTES};
use log::{error, info};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::env;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

#[derive(Debug)]
struct ApiError(RequestError);

impl warp::reject::Reject for ApiError {}

fn reject(e: RequestError) -> Rejection {
    warp::reject::custom(ApiError(e))
}

pub async fn run(monitor: Monitor) {
    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8460);
    info!("Serving API on port {}", port);
    warp::serve(routes(monitor).recover(handle_rejection))
        .run(([0, 0, 0, 0], port))
        .await;
}

fn with_monitor(monitor: Monitor) -> impl Filter<Extract = (Monitor,), Error = Infallible> + Clone {
    warp::any().map(move || monitor.clone())
}

fn routes(monitor: Monitor) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let list = warp::get()
        .and(warp::path!("plates"))
        .and(with_monitor(monitor.clone()))
        .and_then(list_plates);
    let bulk = warp::post()
        .and(warp::path!("plates" / "bulk"))
        .and(warp::body::json())
        .and(with_monitor(monitor.clone()))
        .and_then(bulk_add);
    let add = warp::post()
        .and(warp::path!("plates"))
        .and(warp::body::json())
        .and(with_monitor(monitor.clone()))
        .and_then(add_plate);
    let update = warp::patch()
        .and(warp::path!("plates" / String))
        .and(warp::body::json())
        .and(with_monitor(monitor.clone()))
        .and_then(update_plate);
    let remove = warp::delete()
        .and(warp::path!("plates" / String))
        .and(with_monitor(monitor.clone()))
        .and_then(remove_plate);
    let start = warp::post()
        .and(warp::path!("monitor" / "start"))
        .and(warp::body::json())
        .and(with_monitor(monitor.clone()))
        .and_then(start_monitoring);
    let stop = warp::post()
        .and(warp::path!("monitor" / "stop"))
        .and(with_monitor(monitor.clone()))
        .and_then(stop_monitoring);
    let check = warp::post()
        .and(warp::path!("monitor" / "check"))
        .and(with_monitor(monitor.clone()))
        .and_then(check_now);
    let status = warp::get()
        .and(warp::path!("monitor" / "status"))
        .and(with_monitor(monitor))
        .and_then(monitor_status);
    list.or(bulk)
        .or(add)
        .or(update)
        .or(remove)
        .or(start)
        .or(stop)
        .or(check)
        .or(status)
}

fn field(body: &Value, name: &str) -> Result<String, Rejection> {
    body[name]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| reject(RequestError::Invalid(format!("missing {} field", name))))
}

async fn list_plates(monitor: Monitor) -> Result<impl Reply, Rejection> {
    let plates: Vec<Value> = monitor
        .list_plates()
        .await
        .iter()
        .map(|p| p.to_json())
        .collect();
    Ok(warp::reply::json(&plates))
}

async fn add_plate(body: Value, monitor: Monitor) -> Result<impl Reply, Rejection> {
    let plate_number = field(&body, "plateNumber")?;
    let contact = field(&body, "contact")?;
    let plate = monitor
        .add_plate(&plate_number, &contact)
        .await
        .map_err(reject)?;
    Ok(warp::reply::with_status(
        warp::reply::json(&plate.to_json()),
        StatusCode::CREATED,
    ))
}

async fn bulk_add(body: Value, monitor: Monitor) -> Result<impl Reply, Rejection> {
    let entries = body.as_array().ok_or_else(|| {
        reject(RequestError::Invalid(
            "expected an array of plate entries".to_string(),
        ))
    })?;
    // Missing fields become empty strings and get reported per entry
    // by the registry's own validation.
    let candidates: Vec<(String, String)> = entries
        .iter()
        .map(|entry| {
            (
                entry["plateNumber"].as_str().unwrap_or("").to_string(),
                entry["contact"].as_str().unwrap_or("").to_string(),
            )
        })
        .collect();
    let outcome = monitor.bulk_add(&candidates).await;
    let added: Vec<Value> = outcome.added.iter().map(|p| p.to_json()).collect();
    let errors: Vec<Value> = outcome
        .errors
        .iter()
        .map(|e| json!({ "plateNumber": e.plate_number, "reason": e.reason }))
        .collect();
    Ok(warp::reply::json(&json!({
        "added": added,
        "errors": errors,
    })))
}

async fn update_plate(id: String, body: Value, monitor: Monitor) -> Result<impl Reply, Rejection> {
    let plate = monitor
        .update_plate(&id, body["plateNumber"].as_str(), body["contact"].as_str())
        .await
        .map_err(reject)?;
    Ok(warp::reply::json(&plate.to_json()))
}

async fn remove_plate(id: String, monitor: Monitor) -> Result<impl Reply, Rejection> {
    let plate = monitor.remove_plate(&id).await.map_err(reject)?;
    Ok(warp::reply::json(&plate.to_json()))
}

async fn start_monitoring(body: Value, monitor: Monitor) -> Result<impl Reply, Rejection> {
    let interval = match body.get("intervalMinutes") {
        Some(value) if !value.is_null() => value.as_u64().ok_or_else(|| {
            reject(RequestError::Invalid(
                "intervalMinutes must be a positive integer".to_string(),
            ))
        })?,
        _ => DEFAULT_INTERVAL_MINUTES,
    };
    monitor.start(interval).await.map_err(reject)?;
    Ok(warp::reply::json(&monitor.snapshot().await))
}

async fn stop_monitoring(monitor: Monitor) -> Result<impl Reply, Rejection> {
    monitor.stop().await;
    Ok(warp::reply::json(&monitor.snapshot().await))
}

async fn check_now(monitor: Monitor) -> Result<impl Reply, Rejection> {
    match monitor.run().await {
        Some(summary) => Ok(warp::reply::json(&json!({
            "ran": true,
            "summary": summary.to_json(),
        }))),
        None => Ok(warp::reply::json(&json!({ "ran": false }))),
    }
}

async fn monitor_status(monitor: Monitor) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&monitor.snapshot().await))
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(ApiError(e)) = err.find::<ApiError>() {
        let status = match e {
            RequestError::Invalid(_) => StatusCode::BAD_REQUEST,
            RequestError::Duplicate(_) => StatusCode::CONFLICT,
            RequestError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, e.to_string())
    } else if err
        .find::<warp::filters::body::BodyDeserializeError>()
        .is_some()
    {
        (StatusCode::BAD_REQUEST, "request body must be JSON".to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "no such route".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "method not allowed".to_string(),
        )
    } else {
        error!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };
    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "error": message })),
        status,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{NotificationError, ProbeError};
    use crate::notify::NotificationSender;
    use crate::probe::ProbeClient;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct ClearProbe;

    #[async_trait]
    impl ProbeClient for ClearProbe {
        async fn check(&self, _plate_number: &str) -> Result<bool, ProbeError> {
            Ok(false)
        }
    }

    struct NullNotifier;

    #[async_trait]
    impl NotificationSender for NullNotifier {
        async fn send(&self, _contact: &str, _plate_number: &str) -> Result<(), NotificationError> {
            Ok(())
        }
    }

    fn test_monitor() -> Monitor {
        Monitor::new(
            Arc::new(ClearProbe),
            Arc::new(NullNotifier),
            Duration::from_secs(0),
        )
    }

    #[tokio::test]
    async fn add_then_duplicate_then_list() {
        let monitor = test_monitor();
        let api = routes(monitor.clone()).recover(handle_rejection);
        let response = warp::test::request()
            .method("POST")
            .path("/plates")
            .json(&json!({ "plateNumber": "abc123", "contact": "+971500000000" }))
            .reply(&api)
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["plateNumber"], "ABC123");
        assert_eq!(body["status"], "pending");

        let response = warp::test::request()
            .method("POST")
            .path("/plates")
            .json(&json!({ "plateNumber": "ABC123", "contact": "+971511111111" }))
            .reply(&api)
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = warp::test::request()
            .method("GET")
            .path("/plates")
            .reply(&api)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_field_is_bad_request() {
        let monitor = test_monitor();
        let api = routes(monitor.clone()).recover(handle_rejection);
        let response = warp::test::request()
            .method("POST")
            .path("/plates")
            .json(&json!({ "plateNumber": "ABC123" }))
            .reply(&api)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert!(body["error"].as_str().unwrap().contains("contact"));
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let monitor = test_monitor();
        let api = routes(monitor.clone()).recover(handle_rejection);
        let response = warp::test::request()
            .method("DELETE")
            .path("/plates/no-such-id")
            .reply(&api)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_and_remove_round_trip() {
        let monitor = test_monitor();
        let api = routes(monitor.clone()).recover(handle_rejection);
        let plate = monitor.add_plate("ABC123", "+971500000000").await.unwrap();

        let response = warp::test::request()
            .method("PATCH")
            .path(&format!("/plates/{}", plate.id))
            .json(&json!({ "contact": "+971522222222" }))
            .reply(&api)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["contact"], "+971522222222");

        let response = warp::test::request()
            .method("DELETE")
            .path(&format!("/plates/{}", plate.id))
            .reply(&api)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(monitor.list_plates().await.is_empty());
    }

    #[tokio::test]
    async fn bulk_reports_inline_errors() {
        let monitor = test_monitor();
        let api = routes(monitor.clone()).recover(handle_rejection);
        let response = warp::test::request()
            .method("POST")
            .path("/plates/bulk")
            .json(&json!([
                { "plateNumber": "X1", "contact": "p1" },
                { "plateNumber": "X1", "contact": "p2" },
            ]))
            .reply(&api)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["added"].as_array().unwrap().len(), 1);
        let errors = body["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["plateNumber"], "X1");
    }

    #[tokio::test]
    async fn status_reports_counts_and_activity() {
        let monitor = test_monitor();
        let api = routes(monitor.clone()).recover(handle_rejection);
        monitor.add_plate("ABC123", "+971500000000").await.unwrap();

        let response = warp::test::request()
            .method("GET")
            .path("/monitor/status")
            .reply(&api)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["isActive"], false);
        assert_eq!(body["counts"]["total"], 1);
        assert_eq!(body["counts"]["pending"], 1);
        assert!(body["lastCheckTime"].is_null());
    }

    #[tokio::test]
    async fn start_rejects_bad_interval() {
        let monitor = test_monitor();
        let api = routes(monitor.clone()).recover(handle_rejection);
        let response = warp::test::request()
            .method("POST")
            .path("/monitor/start")
            .json(&json!({ "intervalMinutes": 0 }))
            .reply(&api)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn start_and_stop_toggle_activity() {
        let monitor = test_monitor();
        let api = routes(monitor.clone()).recover(handle_rejection);
        let response = warp::test::request()
            .method("POST")
            .path("/monitor/start")
            .json(&json!({}))
            .reply(&api)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["isActive"], true);
        assert_eq!(body["checkIntervalMinutes"], DEFAULT_INTERVAL_MINUTES);

        let response = warp::test::request()
            .method("POST")
            .path("/monitor/stop")
            .reply(&api)
            .await;
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["isActive"], false);
    }

    #[tokio::test]
    async fn check_now_reports_not_ran_while_stopped() {
        let monitor = test_monitor();
        let api = routes(monitor.clone()).recover(handle_rejection);
        monitor.add_plate("ABC123", "+971500000000").await.unwrap();
        let response = warp::test::request()
            .method("POST")
            .path("/monitor/check")
            .reply(&api)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["ran"], false);
    }

    #[tokio::test]
    async fn check_now_runs_a_cycle_when_active() {
        let monitor = test_monitor();
        let api = routes(monitor.clone()).recover(handle_rejection);
        monitor.add_plate("ABC123", "+971500000000").await.unwrap();
        monitor.start(10_000).await.unwrap();
        let response = warp::test::request()
            .method("POST")
            .path("/monitor/check")
            .reply(&api)
            .await;
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["ran"], true);
        assert_eq!(body["summary"]["checked"], 1);
        assert_eq!(body["summary"]["clear"], 1);
    }
}
