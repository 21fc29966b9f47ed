//! Cookie inspection commands.

use ecl_protocol::{CookieOrdering, MultiDomainCookie};
use serde::Serialize;
use tracing::info;

/// One domain of a decoded cookie.
#[derive(Debug, Serialize)]
pub struct CookieDomainInfo {
    /// Replication domain.
    pub domain: String,
    /// Last change number delivered for the domain.
    pub csn: String,
    /// Change time of that change number.
    pub change_time: String,
    /// Originating replica.
    pub server_id: u16,
    /// Sequence number on that replica.
    pub seqnum: u32,
}

/// Runs the cookie decode command.
pub fn decode(cookie: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    info!("Decoding cookie {:?}", cookie);

    let cookie = MultiDomainCookie::decode(cookie)?;
    let mut domains = Vec::with_capacity(cookie.len());
    for (domain, csn) in cookie.iter() {
        domains.push(CookieDomainInfo {
            domain: domain.to_string(),
            csn: csn.to_string(),
            change_time: csn.change_time()?,
            server_id: csn.server_id(),
            seqnum: csn.seqnum(),
        });
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&domains)?);
        }
        _ => {
            if domains.is_empty() {
                println!("Empty cookie (start of the changelog)");
            }
            for info in &domains {
                println!("{}", info.domain);
                println!("  CSN:         {}", info.csn);
                println!("  Change time: {}", info.change_time);
                println!("  Server ID:   {}", info.server_id);
                println!("  Sequence:    {}", info.seqnum);
            }
        }
    }

    Ok(())
}

/// Runs the cookie compare command.
pub fn compare(left: &str, right: &str) -> Result<(), Box<dyn std::error::Error>> {
    let left = MultiDomainCookie::decode(left)?;
    let right = MultiDomainCookie::decode(right)?;

    let verdict = match left.compare(&right) {
        CookieOrdering::Less => "left is behind right",
        CookieOrdering::Equal => "cookies are equal",
        CookieOrdering::Greater => "left is ahead of right",
        CookieOrdering::Incomparable => "cookies are incomparable",
    };
    println!("{verdict}");

    Ok(())
}
