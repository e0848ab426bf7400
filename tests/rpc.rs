use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use rackd::auth::MasterKeyAuth;
use rackd::engine::Engine;
use rackd::wire;

const MASTER_KEY: &str = "test-master-key";

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<Engine>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("rackd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("rackd.wal")).unwrap());
    let auth = Arc::new(MasterKeyAuth::new(MASTER_KEY.to_string()));

    let engine2 = engine.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine2.clone();
            let auth = auth.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, auth).await;
            });
        }
    });

    (addr, engine)
}

struct Client {
    framed: Framed<TcpStream, LinesCodec>,
    next_id: u64,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let socket = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(socket, LinesCodec::new()),
            next_id: 0,
        }
    }

    async fn send_raw(&mut self, line: &str) -> Value {
        self.framed.send(line).await.unwrap();
        let reply = self.framed.next().await.unwrap().unwrap();
        serde_json::from_str(&reply).unwrap()
    }

    async fn call_with(&mut self, function: &str, params: Value, master_key: Option<&str>) -> Value {
        self.next_id += 1;
        let mut req = json!({ "id": self.next_id, "function": function, "params": params });
        if let Some(key) = master_key {
            req["masterKey"] = json!(key);
        }
        let resp = self.send_raw(&req.to_string()).await;
        assert_eq!(resp["id"], json!(self.next_id));
        resp
    }

    async fn call(&mut self, function: &str, params: Value) -> Value {
        self.call_with(function, params, None).await
    }

    /// Call expecting success; returns `result`.
    async fn ok(&mut self, function: &str, params: Value) -> Value {
        let resp = self.call(function, params).await;
        assert!(resp.get("error").is_none(), "{function} failed: {resp}");
        resp["result"].clone()
    }
}

async fn seed(client: &mut Client, racks: &[(i64, i64, bool, bool)]) {
    for &(row, col, active, occupied) in racks {
        client
            .ok(
                "createRacking",
                json!({ "row": row, "col": col, "active": active, "occupied": occupied }),
            )
            .await;
    }
}

// ── Bulk updates ─────────────────────────────────────────────

#[tokio::test]
async fn bulk_flip_records_history() {
    let (addr, _engine) = start_test_server().await;
    let mut c = Client::connect(addr).await;
    seed(&mut c, &[(1, 1, true, false)]).await;

    let report = c
        .ok(
            "bulkUpdateRackingOccupied",
            json!({ "updates": [{ "row": 1, "col": 1, "occupied": true }] }),
        )
        .await;
    assert_eq!(report["totalProcessed"], 1);
    assert_eq!(report["successCount"], 1);
    assert_eq!(report["failedCount"], 0);
    assert_eq!(
        report["details"]["success"],
        json!([{ "row": 1, "col": 1, "occupied": true }])
    );

    let rack = c.ok("getRacking", json!({ "row": 1, "col": 1 })).await;
    assert_eq!(rack["occupied"], true);

    let history = c.ok("getTodayHistory", json!({})).await;
    assert_eq!(history["success"], true);
    assert_eq!(history["count"], 1);
    assert_eq!(history["data"][0]["action"], "IN");
    assert_eq!(history["data"][0]["row"], 1);
    assert_eq!(history["data"][0]["col"], 1);
}

#[tokio::test]
async fn bulk_reports_partial_success() {
    let (addr, _engine) = start_test_server().await;
    let mut c = Client::connect(addr).await;
    seed(
        &mut c,
        &[(1, 1, true, true), (1, 2, false, false), (2, 1, true, false)],
    )
    .await;

    let report = c
        .ok(
            "bulkUpdateRackingOccupied",
            json!({ "updates": [
                { "row": 1, "col": 1, "occupied": false },
                { "row": 1, "col": 2, "occupied": true },
                { "row": 9, "col": 9, "occupied": true },
                { "row": "a", "col": 1, "occupied": true },
                { "row": 2, "col": 1, "occupied": false },
            ] }),
        )
        .await;

    assert_eq!(report["totalProcessed"], 5);
    assert_eq!(report["successCount"], 2);
    assert_eq!(report["failedCount"], 3);

    let success = report["details"]["success"].as_array().unwrap();
    assert_eq!(success[0], json!({ "row": 1, "col": 1, "occupied": false }));
    assert_eq!(
        success[1],
        json!({ "row": 2, "col": 1, "occupied": false, "message": "no change" })
    );

    let failed = report["details"]["failed"].as_array().unwrap();
    assert_eq!(failed[0]["row"], 1);
    assert_eq!(failed[0]["col"], 2);
    assert_eq!(failed[1]["row"], 9);
    assert!(
        failed[1]["error"].as_str().unwrap().contains("not found"),
        "{}",
        failed[1]
    );
    assert_eq!(failed[2]["row"], "a");

    // Only the real flip leaves a trace.
    let history = c.ok("getTodayHistory", json!({})).await;
    assert_eq!(history["count"], 1);
    assert_eq!(history["data"][0]["action"], "OUT");
}

#[tokio::test]
async fn bulk_rejects_missing_updates() {
    let (addr, _engine) = start_test_server().await;
    let mut c = Client::connect(addr).await;

    for params in [json!({}), json!({ "updates": [] }), json!({ "updates": "x" })] {
        let resp = c.call("bulkUpdateRackingOccupied", params).await;
        assert_eq!(resp["code"], 400, "{resp}");
    }
}

// ── Single-rack procedures ───────────────────────────────────

#[tokio::test]
async fn create_and_update_single_rack() {
    let (addr, _engine) = start_test_server().await;
    let mut c = Client::connect(addr).await;

    let rack = c
        .ok("createRacking", json!({ "row": 4, "col": 2, "label": "A-04-02" }))
        .await;
    assert_eq!(rack["active"], true);
    assert_eq!(rack["occupied"], false);
    assert_eq!(rack["label"], "A-04-02");
    assert!(rack["objectId"].is_string());

    let dup = c.call("createRacking", json!({ "row": 4, "col": 2 })).await;
    assert_eq!(dup["code"], 409);

    let same = c
        .call("updateRacking", json!({ "row": 4, "col": 2, "occupied": false }))
        .await;
    assert_eq!(same["code"], 403);
    assert_eq!(same["error"], "rack not yet occupied");

    let updated = c
        .ok("updateRacking", json!({ "row": 4, "col": 2, "occupied": true }))
        .await;
    assert_eq!(updated["occupied"], true);
    assert_eq!(updated["objectId"], rack["objectId"]);

    let missing = c.call("getRacking", json!({ "row": 0, "col": 0 })).await;
    assert_eq!(missing["code"], 404);
}

#[tokio::test]
async fn list_racking_is_position_ordered() {
    let (addr, _engine) = start_test_server().await;
    let mut c = Client::connect(addr).await;
    seed(&mut c, &[(2, 1, true, false), (1, 2, true, false), (1, 1, true, false)]).await;

    let racks = c.ok("listRacking", Value::Null).await;
    let positions: Vec<(i64, i64)> = racks
        .as_array()
        .unwrap()
        .iter()
        .map(|r| (r["row"].as_i64().unwrap(), r["col"].as_i64().unwrap()))
        .collect();
    assert_eq!(positions, vec![(1, 1), (1, 2), (2, 1)]);
}

// ── History and privileges ───────────────────────────────────

#[tokio::test]
async fn create_history_requires_master_key() {
    let (addr, engine) = start_test_server().await;
    let mut c = Client::connect(addr).await;
    let params = json!({ "action": "IN", "row": 3, "col": 3 });

    let denied = c.call("createHistory", params.clone()).await;
    assert_eq!(denied["code"], 403);
    assert_eq!(engine.audit_count().await, 0);

    let wrong = c
        .call_with("createHistory", params.clone(), Some("guess"))
        .await;
    assert_eq!(wrong["code"], 401);

    let ok = c
        .call_with("createHistory", params, Some(MASTER_KEY))
        .await;
    assert_eq!(ok["result"]["action"], "IN");
    assert_eq!(engine.audit_count().await, 1);
}

#[tokio::test]
async fn today_history_newest_first() {
    let (addr, _engine) = start_test_server().await;
    let mut c = Client::connect(addr).await;
    seed(&mut c, &[(1, 1, true, false)]).await;

    c.ok("updateRacking", json!({ "row": 1, "col": 1, "occupied": true }))
        .await;
    c.ok("updateRacking", json!({ "row": 1, "col": 1, "occupied": false }))
        .await;

    let history = c.ok("getTodayHistory", json!({})).await;
    assert_eq!(history["count"], 2);
    assert_eq!(history["data"][0]["action"], "OUT");
    assert_eq!(history["data"][1]["action"], "IN");
}

// ── Protocol errors ──────────────────────────────────────────

#[tokio::test]
async fn malformed_lines_do_not_drop_connection() {
    let (addr, _engine) = start_test_server().await;
    let mut c = Client::connect(addr).await;

    let resp = c.send_raw("this is not json").await;
    assert_eq!(resp["code"], 400);
    assert_eq!(resp["id"], Value::Null);

    let resp = c.call("launchRockets", json!({})).await;
    assert_eq!(resp["code"], 404);

    // Same connection still answers.
    let racks = c.ok("listRacking", json!({})).await;
    assert_eq!(racks, json!([]));
}

#[tokio::test]
async fn concurrent_clients_share_state() {
    let (addr, _engine) = start_test_server().await;
    let mut setup = Client::connect(addr).await;
    seed(
        &mut setup,
        &(0..8).map(|col| (1, col, true, false)).collect::<Vec<_>>(),
    )
    .await;

    let mut handles = Vec::new();
    for col in 0..8i64 {
        handles.push(tokio::spawn(async move {
            let mut c = Client::connect(addr).await;
            c.ok(
                "bulkUpdateRackingOccupied",
                json!({ "updates": [{ "row": 1, "col": col, "occupied": true }] }),
            )
            .await
        }));
    }
    for h in handles {
        let report = h.await.unwrap();
        assert_eq!(report["successCount"], 1);
    }

    let history = setup.ok("getTodayHistory", json!({})).await;
    assert_eq!(history["count"], 8);
}
