// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Routines for building and reading packet capture files of raw
//! IPv4 packets.

use pcap_parser::Linktype;
use pcap_parser::ToVec;
use pcap_parser::pcap;
use pcap_parser::pcap::LegacyPcapBlock;
use pcap_parser::pcap::PcapHeader;
use std::io::Write;

fn get_header(offset: &[u8]) -> (&[u8], PcapHeader) {
    match pcap::parse_pcap_header(offset) {
        Ok((new_offset, header)) => (new_offset, header),
        Err(e) => panic!("failed to get header: {e:?}"),
    }
}

fn next_block(offset: &[u8]) -> (&[u8], LegacyPcapBlock<'_>) {
    match pcap::parse_pcap_frame(offset) {
        Ok((new_offset, block)) => {
            // We always want access to the entire packet.
            assert_eq!(block.origlen, block.caplen);
            (new_offset, block)
        }

        Err(e) => panic!("failed to get next block: {e:?}"),
    }
}

/// Read back every packet in a capture.
pub fn read_pkts(mut bytes: &[u8]) -> Vec<Vec<u8>> {
    let (rest, hdr) = get_header(bytes);
    assert_eq!(hdr.network, Linktype::RAW);
    bytes = rest;

    let mut pkts = vec![];
    while !bytes.is_empty() {
        let (rest, block) = next_block(bytes);
        pkts.push(block.data.to_vec());
        bytes = rest;
    }
    pkts
}

/// Build a packet capture from a series of packets.
pub struct PcapBuilder<W: Write> {
    out: W,
    ts_usec: u32,
}

impl<W: Write> PcapBuilder<W> {
    /// Create a new pcap builder, writing all captures to `out`.
    pub fn new(mut out: W) -> Self {
        let mut hdr = PcapHeader {
            magic_number: 0xa1b2c3d4,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen: 1500,
            network: Linktype::RAW,
        };

        out.write_all(&hdr.to_vec().unwrap()).unwrap();

        Self { out, ts_usec: 0 }
    }

    /// Add a packet to the capture, one millisecond after the last.
    pub fn add_pkt(&mut self, pkt: &[u8]) {
        let mut block = LegacyPcapBlock {
            ts_sec: self.ts_usec / 1_000_000,
            ts_usec: self.ts_usec % 1_000_000,
            caplen: pkt.len() as u32,
            origlen: pkt.len() as u32,
            data: pkt,
        };
        self.ts_usec += 1_000;

        self.out.write_all(&block.to_vec().unwrap()).unwrap();
    }

    pub fn finish(self) -> W {
        self.out
    }
}
