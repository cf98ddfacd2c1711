//! Integration tests for the model endpoint client

#[cfg(feature = "inference")]
mod inference_tests {
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use sobriety_pipeline::core::{InferenceRow, WindowPayload};
    use sobriety_pipeline::inference::{
        BlockingInferenceClient, InferenceClient, InferenceConfig, InferenceError, Predictor,
    };
    use std::net::SocketAddr;

    async fn score(
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok());
        if auth != Some("Bearer test-key") {
            return Err((StatusCode::UNAUTHORIZED, "invalid key".to_string()));
        }

        let table = &body["input_data"];
        let columns = table["columns"].as_array().map(|c| c.len()).unwrap_or(0);
        let row = table["data"][0].as_array().map(|r| r.len()).unwrap_or(0);
        if columns != 27 || row != 27 || table["index"] != serde_json::json!([0]) {
            return Err((StatusCode::BAD_REQUEST, "bad table".to_string()));
        }

        Ok(Json(serde_json::json!([0.73])))
    }

    async fn unavailable() -> (StatusCode, &'static str) {
        (StatusCode::SERVICE_UNAVAILABLE, "model loading")
    }

    async fn spawn_mock() -> SocketAddr {
        let app = Router::new()
            .route("/score", post(score))
            .route("/down", post(unavailable));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock endpoint");
        let addr = listener.local_addr().expect("No local address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        addr
    }

    fn row() -> InferenceRow {
        let payload = WindowPayload::from_json(
            r#"{"deviceId": "BK7610", "readings": [
                {"x": 0.01, "y": -0.02, "z": 0.98, "time": 1493735870653},
                {"x": 0.03, "y": -0.01, "z": 1.01, "time": 1493735870678},
                {"x": -0.02, "y": 0.00, "z": 0.99, "time": 1493735870703}
            ]}"#,
        )
        .expect("Failed to parse payload");
        payload.to_inference_row().expect("Payload has readings")
    }

    #[tokio::test]
    async fn test_prediction_round_trip() {
        let addr = spawn_mock().await;
        let config = InferenceConfig::new(format!("http://{addr}/score"), "test-key");
        let client = InferenceClient::new(config).expect("Failed to create client");

        let prediction = client.predict(&row()).await.expect("Prediction failed");
        assert_eq!(prediction, 0.73);
    }

    #[tokio::test]
    async fn test_wrong_key_is_server_error() {
        let addr = spawn_mock().await;
        let config = InferenceConfig::new(format!("http://{addr}/score"), "other-key");
        let client = InferenceClient::new(config).unwrap();

        match client.predict(&row()).await {
            Err(InferenceError::Server { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "invalid key");
            }
            other => panic!("Expected server error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unavailable_endpoint() {
        let addr = spawn_mock().await;
        let config = InferenceConfig::new(format!("http://{addr}/down"), "test-key");
        let client = InferenceClient::new(config).unwrap();

        let err = client.predict(&row()).await.unwrap_err();
        assert!(matches!(err, InferenceError::Server { status: 503, .. }));
    }

    #[test]
    fn test_unconfigured_client() {
        let err = InferenceClient::new(InferenceConfig::default())
            .err()
            .expect("Client should need an endpoint");
        assert!(matches!(err, InferenceError::Config(_)));
    }

    #[test]
    fn test_blocking_client_as_predictor() {
        // The mock runs on its own runtime; the blocking client owns another.
        let (addr_tx, addr_rx) = crossbeam_channel::bounded(1);
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let server = std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async move {
                let addr = spawn_mock().await;
                addr_tx.send(addr).unwrap();
                let _ = done_rx.await;
            });
        });

        let addr: SocketAddr = addr_rx.recv().unwrap();
        let config = InferenceConfig::new(format!("http://{addr}/score"), "test-key");
        let predictor: Box<dyn Predictor> =
            Box::new(BlockingInferenceClient::new(config).unwrap());

        assert_eq!(predictor.predict(&row()).unwrap(), 0.73);

        let _ = done_tx.send(());
        server.join().unwrap();
    }
}
