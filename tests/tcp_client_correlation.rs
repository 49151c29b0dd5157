// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execute this test only if the `tcp` feature is selected.

#![cfg(feature = "tcp")]

use std::{net::SocketAddr, time::Duration};

use modbus_engine::{
    client::{
        tcp::{TcpClient, TcpTransport},
        ClientConfig,
    },
    codec::tcp::MbapCodec,
    scheduler::TokioScheduler,
    transport::{FramedTransport, TcpConnector},
    Error, Request, Response, Unit,
};
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::{TcpListener, TcpStream},
};

const READ_HOLDING_REGISTERS_LEN: usize = 12;

async fn setup() -> anyhow::Result<(TcpClient<TcpTransport>, TcpStream)> {
    let _ = env_logger::builder().is_test(true).try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let socket_addr: SocketAddr = listener.local_addr()?;
    let client = TcpClient::new(
        FramedTransport::new(TcpConnector::new(socket_addr), MbapCodec::new()),
        TokioScheduler::current()?,
        ClientConfig::default().with_request_timeout(Duration::from_millis(500)),
    );
    let (connected, accepted) = tokio::join!(client.connect(), listener.accept());
    connected?;
    let (stream, _) = accepted?;
    Ok((client, stream))
}

fn transaction_id(request: &[u8]) -> [u8; 2] {
    [request[0], request[1]]
}

fn holding_registers_response(transaction_id: [u8; 2], word: u16) -> Vec<u8> {
    let [hi, lo] = word.to_be_bytes();
    let mut rsp = transaction_id.to_vec();
    rsp.extend_from_slice(&[0x00, 0x00, 0x00, 0x05, 0x01, 0x03, 0x02, hi, lo]);
    rsp
}

#[tokio::test]
async fn responses_in_reverse_order() -> anyhow::Result<()> {
    let (client, mut server) = setup().await?;

    let first = client
        .send_request(Unit(1), Request::ReadHoldingRegisters(0, 1))
        .await?;
    let second = client
        .send_request(Unit(1), Request::ReadHoldingRegisters(1, 1))
        .await?;
    assert_eq!(client.pending_requests(), 2);

    let mut requests = [0; 2 * READ_HOLDING_REGISTERS_LEN];
    server.read_exact(&mut requests).await?;
    let (req1, req2) = requests.split_at(READ_HOLDING_REGISTERS_LEN);
    assert_ne!(transaction_id(req1), transaction_id(req2));

    server
        .write_all(&holding_registers_response(transaction_id(req2), 0x0202))
        .await?;
    server
        .write_all(&holding_registers_response(transaction_id(req1), 0x0101))
        .await?;

    assert_eq!(
        second.await?,
        Response::ReadHoldingRegisters(vec![0x0202])
    );
    assert_eq!(first.await?, Response::ReadHoldingRegisters(vec![0x0101]));
    assert_eq!(client.pending_requests(), 0);
    Ok(())
}

#[tokio::test]
async fn concurrent_requests_get_their_own_responses() -> anyhow::Result<()> {
    let (client, mut server) = setup().await?;

    let addresses: Vec<u16> = (0..10).map(|i| i * 3).collect();
    let responses = futures::future::try_join_all(
        addresses
            .iter()
            .map(|addr| client.send_request(Unit(1), Request::ReadHoldingRegisters(*addr, 1))),
    )
    .await?;

    let mut requests = vec![0; addresses.len() * READ_HOLDING_REGISTERS_LEN];
    server.read_exact(&mut requests).await?;
    // Echo the requested address, last request first
    for request in requests.chunks(READ_HOLDING_REGISTERS_LEN).rev() {
        let addr = u16::from_be_bytes([request[8], request[9]]);
        server
            .write_all(&holding_registers_response(transaction_id(request), addr))
            .await?;
    }

    let responses = futures::future::try_join_all(responses).await?;
    for (addr, response) in addresses.into_iter().zip(responses) {
        assert_eq!(response, Response::ReadHoldingRegisters(vec![addr]));
    }
    Ok(())
}

#[tokio::test]
async fn unknown_transaction_id_is_ignored() -> anyhow::Result<()> {
    let (client, mut server) = setup().await?;

    let response = client
        .send_request(Unit(1), Request::ReadHoldingRegisters(0, 1))
        .await?;
    let mut request = [0; READ_HOLDING_REGISTERS_LEN];
    server.read_exact(&mut request).await?;
    let [hi, lo] = transaction_id(&request);
    let unknown = [hi.wrapping_add(0x80), lo];

    server
        .write_all(&holding_registers_response(unknown, 0xDEAD))
        .await?;
    server
        .write_all(&holding_registers_response([hi, lo], 0x0007))
        .await?;

    assert_eq!(response.await?, Response::ReadHoldingRegisters(vec![0x0007]));
    Ok(())
}

#[tokio::test]
async fn timeout_and_remote_close() -> anyhow::Result<()> {
    let (client, server) = setup().await?;

    let response = client
        .send_request(Unit(1), Request::ReadCoils(0, 8))
        .await?;
    assert!(matches!(response.await, Err(Error::Timeout(_))));
    assert_eq!(client.pending_requests(), 0);

    let response = client
        .send_request(Unit(1), Request::ReadCoils(0, 8))
        .await?;
    drop(server);
    assert!(matches!(response.await, Err(Error::ConnectionClosed)));
    Ok(())
}
