// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Print connection dumps and rules in a human-friendly manner.
//!
//! These live here rather than in the admin tool so integration tests
//! can use them too.

use crate::api::ConnDump;
use crate::api::DumpConnsResp;
use crate::engine::rule::Ruleset;
use std::io::Write;
use std::string::String;
use tabwriter::TabWriter;

/// Print a [`DumpConnsResp`].
pub fn print_conns(resp: &DumpConnsResp) -> std::io::Result<()> {
    print_conns_into(&mut std::io::stdout(), resp)
}

/// Print a [`DumpConnsResp`] into a given writer.
pub fn print_conns_into(
    writer: &mut impl Write,
    resp: &DumpConnsResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "Connections: {}", resp.conns.len())?;
    write_hr(&mut t)?;
    writeln!(t, "ID\tORIGINAL\tREPLY\tNAT\tIF\tHITS\tIDLE (ms)")?;
    for conn in &resp.conns {
        print_conn(&mut t, conn)?;
    }
    t.flush()
}

fn print_conn(t: &mut impl Write, conn: &ConnDump) -> std::io::Result<()> {
    let ifindex = match conn.ifindex {
        Some(i) => i.to_string(),
        None => String::from("-"),
    };

    writeln!(
        t,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}",
        conn.id,
        conn.original,
        conn.reply,
        nat_flags(conn),
        ifindex,
        conn.hits,
        conn.idle_ms,
    )
}

fn nat_flags(conn: &ConnDump) -> String {
    let mut flags = vec![];
    if conn.snat {
        flags.push("SNAT");
    }
    if conn.dnat {
        flags.push("DNAT");
    }
    if conn.masquerade {
        flags.push("MASQ");
    }

    if flags.is_empty() { String::from("-") } else { flags.join(",") }
}

/// Print a [`Ruleset`] in selection order.
pub fn print_rules(rules: &Ruleset) -> std::io::Result<()> {
    print_rules_into(&mut std::io::stdout(), rules)
}

pub fn print_rules_into(
    writer: &mut impl Write,
    rules: &Ruleset,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "#\tNAME\tMATCH\tACTION\tLIMIT")?;
    for (i, rule) in rules.iter().enumerate() {
        let action = match &rule.nat {
            Some(nat) => nat.to_string(),
            None => String::from("ACCEPT"),
        };
        let limit = match &rule.limit {
            Some(l) => l.cfg().to_string(),
            None => String::from("-"),
        };
        writeln!(
            t,
            "{i}\t{}\t{}\t{action}\t{limit}",
            rule.name, rule.matcher,
        )?;
    }
    t.flush()
}

/// Print horizontal rule in bold.
fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "\x1b[1m{}\x1b[0m", "-".repeat(70))
}
