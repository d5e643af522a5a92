// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
// build script to regenerate code from the flintlock protobuf files

#[cfg(feature = "regen-proto")]
fn build_flintlock_protos() {
    let files = vec!["proto/microvm.proto"];
    for x in &files {
        println!("cargo:rerun-if-changed={x}");
    }
    tonic_build::configure()
        .build_client(true)
        .build_server(false)
        .out_dir("src/proto")
        .compile_protos(&files, &["proto"])
        .unwrap();
}

fn main() {
    #[cfg(feature = "regen-proto")]
    build_flintlock_protos();
}
