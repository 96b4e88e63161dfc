use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use slotbook::model::BusinessHoursConfig;
use slotbook::tenant::{TenantManager, TenantOptions};
use slotbook::wire;

const DATE: &str = "2024-01-15"; // a Monday

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("slotbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(
        dir,
        Arc::new(BusinessHoursConfig::default()),
        TenantOptions::default(),
    ));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "slotbook".to_string(), None).await;
            });
        }
    });

    (addr, tm)
}

async fn connect(addr: SocketAddr, dbname: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(dbname)
        .user("slotbook")
        .password("slotbook");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

async fn rows(client: &tokio_postgres::Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|msg| match msg {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn book(client: &tokio_postgres::Client, id: Ulid, start: &str, end: &str) -> Result<(), tokio_postgres::Error> {
    client
        .batch_execute(&format!(
            r#"INSERT INTO reservations (id, date, start, "end", name, email, phone, message) VALUES ('{id}', '{DATE}', '{start}', '{end}', 'Asha', 'asha@example.com', '', 'hello')"#
        ))
        .await
}

async fn send_event(client: &tokio_postgres::Client, id: Ulid, event: &str) -> Result<(), tokio_postgres::Error> {
    client
        .batch_execute(&format!(
            "INSERT INTO reservation_events (reservation_id, event) VALUES ('{id}', '{event}')"
        ))
        .await
}

/// Booleans come back in PostgreSQL text form.
fn is_true(value: Option<&str>) -> bool {
    matches!(value, Some("t") | Some("true"))
}

fn sqlstate(err: &tokio_postgres::Error) -> Option<String> {
    err.as_db_error().map(|e| e.code().code().to_string())
}

async fn unavailable_slots(client: &tokio_postgres::Client) -> Vec<String> {
    rows(client, &format!("SELECT * FROM slots WHERE date = '{DATE}'"))
        .await
        .iter()
        .filter(|r| !is_true(r.get("is_available")))
        .map(|r| r.get("start").unwrap_or_default().to_string())
        .collect()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn lists_the_default_day() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "listing").await;

    let slots = rows(&client, &format!("SELECT * FROM slots WHERE date = '{DATE}'")).await;
    assert_eq!(slots.len(), 12);
    assert_eq!(slots[0].get("start"), Some("10:00"));
    assert_eq!(slots[0].get("end"), Some("10:30"));
    assert_eq!(slots[11].get("end"), Some("17:00"));
    assert!(slots.iter().all(|r| is_true(r.get("is_available"))));

    // Sunday: closed.
    let sunday = rows(&client, "SELECT * FROM slots WHERE date = '2024-01-14'").await;
    assert!(sunday.is_empty());
}

#[tokio::test]
async fn booking_lifecycle_over_the_wire() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "lifecycle").await;
    let id = Ulid::new();

    book(&client, id, "11:00", "11:30").await.unwrap();

    // Pending: still listed, but not bookable.
    assert!(unavailable_slots(&client).await.is_empty());
    let check = rows(
        &client,
        &format!(r#"SELECT * FROM availability WHERE date = '{DATE}' AND start = '11:00' AND "end" = '11:30'"#),
    )
    .await;
    assert!(!is_true(check[0].get("available")));
    assert!(check[0].get("reason").unwrap_or_default().contains("conflicts"));

    send_event(&client, id, "pay_success").await.unwrap();
    assert_eq!(unavailable_slots(&client).await, ["11:00"]);

    let r = rows(&client, &format!("SELECT * FROM reservations WHERE id = '{id}'")).await;
    assert_eq!(r.len(), 1);
    assert_eq!(r[0].get("status"), Some("confirmed"));
    assert_eq!(r[0].get("payment_status"), Some("completed"));
    assert_eq!(r[0].get("message"), Some("hello"));
    assert_eq!(r[0].get("meeting_ref"), None);

    client
        .batch_execute(&format!(
            "INSERT INTO meeting_links (reservation_id, meeting_ref) VALUES ('{id}', 'https://meet.example.com/{id}')"
        ))
        .await
        .unwrap();

    send_event(&client, id, "admin_complete").await.unwrap();
    let r = rows(&client, &format!("SELECT * FROM reservations WHERE id = '{id}'")).await;
    assert_eq!(r[0].get("status"), Some("completed"));
    let expected_link = format!("https://meet.example.com/{id}");
    assert_eq!(r[0].get("meeting_ref"), Some(expected_link.as_str()));

    let stats = rows(&client, &format!("SELECT * FROM stats WHERE today = '{DATE}'")).await;
    assert_eq!(stats[0].get("total"), Some("1"));
    assert_eq!(stats[0].get("completed"), Some("1"));
    assert_eq!(stats[0].get("upcoming"), Some("0"));
}

#[tokio::test]
async fn conflicts_and_illegal_transitions_are_p0001() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "errors").await;
    let id = Ulid::new();

    book(&client, id, "10:00", "10:30").await.unwrap();

    let err = book(&client, Ulid::new(), "10:00", "10:30").await.unwrap_err();
    assert_eq!(sqlstate(&err).as_deref(), Some("P0001"));
    assert!(err.as_db_error().unwrap().message().contains("conflicts with existing reservation"));

    let err = book(&client, Ulid::new(), "10:15", "10:45").await.unwrap_err();
    assert_eq!(sqlstate(&err).as_deref(), Some("P0001"));
    assert!(err.as_db_error().unwrap().message().contains("not a recognized slot"));

    let err = send_event(&client, id, "admin_complete").await.unwrap_err();
    assert_eq!(sqlstate(&err).as_deref(), Some("P0001"));

    // Cancelling twice is fine; the slot opens up again.
    send_event(&client, id, "admin_cancel").await.unwrap();
    send_event(&client, id, "admin_cancel").await.unwrap();
    book(&client, Ulid::new(), "10:00", "10:30").await.unwrap();
}

#[tokio::test]
async fn syntax_errors_are_42601() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "syntax").await;

    let err = client.batch_execute("SELEKT * FROM slots").await.unwrap_err();
    assert_eq!(sqlstate(&err).as_deref(), Some("42601"));

    let err = client.batch_execute("SELECT * FROM bookings").await.unwrap_err();
    assert_eq!(sqlstate(&err).as_deref(), Some("42601"));
}

#[tokio::test]
async fn delete_frees_the_slot() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "delete").await;
    let id = Ulid::new();

    book(&client, id, "15:00", "15:30").await.unwrap();
    send_event(&client, id, "pay_success").await.unwrap();
    assert_eq!(unavailable_slots(&client).await, ["15:00"]);

    client
        .batch_execute(&format!("DELETE FROM reservations WHERE id = '{id}'"))
        .await
        .unwrap();
    assert!(unavailable_slots(&client).await.is_empty());
    assert!(rows(&client, "SELECT * FROM reservations").await.is_empty());
}

#[tokio::test]
async fn calendars_are_isolated_by_database() {
    let (addr, _tm) = start_test_server().await;
    let clinic_a = connect(addr, "clinic_a").await;
    let clinic_b = connect(addr, "clinic_b").await;

    let id = Ulid::new();
    book(&clinic_a, id, "16:00", "16:30").await.unwrap();
    send_event(&clinic_a, id, "pay_success").await.unwrap();

    assert_eq!(unavailable_slots(&clinic_a).await, ["16:00"]);
    assert!(unavailable_slots(&clinic_b).await.is_empty());
    book(&clinic_b, Ulid::new(), "16:00", "16:30").await.unwrap();
}

#[tokio::test]
async fn parameterized_insert() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "params").await;
    let id = Ulid::new().to_string();

    let inserted = client
        .execute(
            r#"INSERT INTO reservations (id, date, start, "end", name, email, phone) VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
            &[&id, &DATE, &"12:00", &"12:30", &"O'Brien", &"", &"+911234567890"],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let r = rows(&client, &format!("SELECT * FROM reservations WHERE id = '{id}'")).await;
    assert_eq!(r[0].get("name"), Some("O'Brien"));
    assert_eq!(r[0].get("status"), Some("pending"));
}

#[tokio::test]
async fn concurrent_clients_cannot_double_book() {
    let (addr, _tm) = start_test_server().await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        handles.push(tokio::spawn(async move {
            let client = connect(addr, "race").await;
            book(&client, Ulid::new(), "13:30", "14:00").await.is_ok()
        }));
    }
    let mut won = 0;
    for h in handles {
        if h.await.unwrap() {
            won += 1;
        }
    }
    assert_eq!(won, 1);
}

#[tokio::test]
async fn bound_values_containing_placeholders_stay_literal() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "dollar_params").await;
    let id = Ulid::new().to_string();

    client
        .execute(
            r#"INSERT INTO reservations (id, date, start, "end", name, email, phone, message) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
            &[&id, &DATE, &"12:30", &"13:00", &"Asha", &"asha@example.com", &"", &"budget is $1 per minute"],
        )
        .await
        .unwrap();

    let r = rows(&client, &format!("SELECT * FROM reservations WHERE id = '{id}'")).await;
    assert_eq!(r[0].get("message"), Some("budget is $1 per minute"));
    assert_eq!(r[0].get("start"), Some("12:30"));
}
