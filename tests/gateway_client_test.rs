mod common;

use common::*;
use tokio_postgres::{NoTls, SimpleQueryMessage};

async fn connect(port: u16, user: &str, password: &str) -> Result<tokio_postgres::Client, tokio_postgres::Error> {
    let config = format!("host=127.0.0.1 port={port} dbname=octopus user={user} password={password} sslmode=disable");
    let (client, connection) = tokio_postgres::connect(&config, NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("Connection error: {e}");
        }
    });
    Ok(client)
}

fn rows(messages: &[SimpleQueryMessage]) -> Vec<Vec<Option<String>>> {
    messages
        .iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => {
                Some((0..row.len()).map(|i| row.get(i).map(str::to_string)).collect())
            }
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_simple_queries_through_driver() {
    let server = start_gateway(
        10,
        &[(
            "inventory",
            "CREATE TABLE items (sku TEXT, qty INTEGER);
             INSERT INTO items VALUES ('a-1', 4), ('b-2', 0);",
        )],
    )
    .await;
    let client = connect(server.port, SUPERUSER, PASSWORD).await.unwrap();

    let messages = client
        .simple_query("SELECT sku, qty FROM inventory.__DEFAULT.items ORDER BY sku")
        .await
        .unwrap();
    assert_eq!(
        rows(&messages),
        vec![
            vec![Some("a-1".to_string()), Some("4".to_string())],
            vec![Some("b-2".to_string()), Some("0".to_string())],
        ]
    );

    let messages = client
        .simple_query("INSERT INTO items VALUES ('c-3', 9)")
        .await
        .unwrap();
    assert!(matches!(messages.last(), Some(SimpleQueryMessage::CommandComplete(1))));

    let messages = client.simple_query("SHOW TABLES DATASOURCE inventory").await.unwrap();
    let tables = rows(&messages);
    assert_eq!(tables.len(), 1);
    assert!(tables[0].contains(&Some("items".to_string())));

    server.abort();
}

#[tokio::test]
async fn test_driver_sees_sql_state() {
    let server = start_gateway(10, &[]).await;

    let err = connect(server.port, SUPERUSER, "wrong").await.err().unwrap();
    assert_eq!(err.as_db_error().unwrap().code().code(), "28P01");

    let client = connect(server.port, SUPERUSER, PASSWORD).await.unwrap();
    let err = client.simple_query("DROP TABLE anything").await.unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code().code(), "0A000");

    let err = client.simple_query("SELEC 1").await.unwrap_err();
    assert_eq!(err.as_db_error().unwrap().code().code(), "42601");
    server.abort();
}
