//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;

use axum::Router;
use footsteps::coord::TileCoord;
use footsteps::pmtiles::ArchiveWriter;
use geozero::mvt::tile::{self, GeomType};
use geozero::mvt::{Message, Tile};
use tokio::net::TcpListener;

/// Serves `router` on an ephemeral loopback port.
pub async fn spawn_server(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// An MVT tile with `count` point features in a layer named `humans`.
pub fn mvt_points(count: usize) -> Vec<u8> {
    let features = (0..count)
        .map(|i| tile::Feature {
            id: Some(i as u64),
            tags: vec![],
            r#type: Some(GeomType::Point as i32),
            geometry: vec![(1 << 3) | 1, 2048, 2048],
        })
        .collect();
    Tile {
        layers: vec![tile::Layer {
            version: 2,
            name: "humans".to_string(),
            features,
            keys: vec![],
            values: vec![],
            extent: Some(4096),
        }],
    }
    .encode_to_vec()
}

/// Writes an archive holding every tile of `zoom`, each with `count` points.
pub fn write_world_archive(path: &Path, zoom: u8, count: usize) {
    let mut writer = ArchiveWriter::new();
    let side = 1u32 << zoom;
    for x in 0..side {
        for y in 0..side {
            writer
                .add_tile(TileCoord { z: zoom, x, y }, mvt_points(count))
                .unwrap();
        }
    }
    std::fs::write(path, writer.finish().unwrap()).unwrap();
}
