//! Large rows, field truncation and the compressed protocol

mod common;

use common::{default_server_capabilities, join, start, test_opts};
use mariadb_wire::col::ColumnDefinition;
use mariadb_wire::constant::{CapabilityFlags, ColumnType, MAX_PACKET_CHUNK};
use mariadb_wire::{Conn, Opts, Row};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn blob_columns() -> [ColumnDefinition; 2] {
    [
        ColumnDefinition::new("payload", ColumnType::MYSQL_TYPE_LONG_BLOB),
        ColumnDefinition::new("id", ColumnType::MYSQL_TYPE_LONG),
    ]
}

#[test]
fn row_larger_than_one_packet_is_reassembled() {
    let value = pattern(MAX_PACKET_CHUNK + 100);
    let expected = value.clone();
    let (stream, server) = start(default_server_capabilities(), move |server| {
        server.accept_setup()?;
        server.expect_query("SELECT payload, id FROM blobs")?;
        server.send_text_result(
            &blob_columns(),
            &[vec![Some(value.as_slice()), Some(b"7".as_slice())]],
        )
    });
    let mut conn = Conn::with_stream(stream, test_opts()).unwrap();

    let mut result = conn.query("SELECT payload, id FROM blobs").unwrap();
    let mut row = Row::new();
    assert!(result.fetch_row(&mut row).unwrap());
    assert_eq!(row.get(0).map(<[u8]>::len), Some(expected.len()));
    assert!(row.get(0) == Some(expected.as_slice()));
    assert_eq!(row.get(1), Some(b"7".as_slice()));
    assert!(!result.fetch_row(&mut row).unwrap());
    drop(result);
    join(server);
}

#[test]
fn max_field_size_keeps_a_prefix_of_large_fields() {
    let value = pattern(200_000);
    let prefix = value[..16].to_vec();
    let (stream, server) = start(default_server_capabilities(), move |server| {
        server.accept_setup()?;
        for _ in 0..2 {
            server.expect_query("SELECT payload, id FROM blobs")?;
            server.send_text_result(
                &blob_columns(),
                &[vec![Some(value.as_slice()), Some(b"7".as_slice())]],
            )?;
        }
        Ok(())
    });
    let opts = Opts {
        max_field_size: Some(16),
        ..test_opts()
    };
    let mut conn = Conn::with_stream(stream, opts).unwrap();

    let rows = conn.query_rows("SELECT payload, id FROM blobs").unwrap();
    assert_eq!(rows[0].get(0), Some(prefix.as_slice()));
    // non-text columns are never cut
    assert_eq!(rows[0].get(1), Some(b"7".as_slice()));

    conn.set_max_field_size(None);
    let rows = conn.query_rows("SELECT payload, id FROM blobs").unwrap();
    assert_eq!(rows[0].get(0).map(<[u8]>::len), Some(200_000));
    join(server);
}

#[test]
fn compressed_session_round_trips_large_payloads() {
    let big_text = "a".repeat(20_000);
    let query = format!("SELECT '{}'", "b".repeat(5_000));
    let expected_query = query.clone();
    let reply = big_text.clone();
    let advertised = default_server_capabilities() | CapabilityFlags::CLIENT_COMPRESS;
    let (stream, server) = start(advertised, move |server| {
        assert!(server.is_compressed());
        server.accept_setup()?;
        server.expect_query(&expected_query)?;
        server.send_text_result(
            &[ColumnDefinition::new("t", ColumnType::MYSQL_TYPE_VAR_STRING)],
            &[vec![Some(reply.as_bytes())], vec![Some(b"short".as_slice())]],
        )?;
        server.accept_ping()
    });
    let opts = Opts {
        compress: true,
        ..test_opts()
    };
    let mut conn = Conn::with_stream(stream, opts).unwrap();
    assert!(conn.is_compressed());
    assert!(conn.capabilities().contains(CapabilityFlags::CLIENT_COMPRESS));

    let rows = conn.query_rows(&query).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get_str(0).unwrap(), Some(big_text.as_str()));
    assert_eq!(rows[1].get_str(0).unwrap(), Some("short"));

    conn.ping().unwrap();
    join(server);
}

#[test]
fn oversized_command_is_rejected_before_sending() {
    let (stream, server) = start(default_server_capabilities(), |server| {
        server.accept_setup()?;
        server.accept_ping()
    });
    let mut conn = Conn::with_stream(stream, test_opts()).unwrap();
    let limit = conn.max_allowed_packet().unwrap();

    let query = format!("SELECT '{}'", "x".repeat(limit));
    let err = conn.query_drop(&query).unwrap_err();
    assert!(
        matches!(err, mariadb_wire::Error::PacketTooLarge { .. }),
        "{err:?}"
    );
    assert!(!conn.is_broken());

    conn.ping().unwrap();
    join(server);
}
