//! Byte-level TLS handshake parsing, used by the TLS plugin (§4.5).
//! Parses just enough of a ClientHello/ServerHello to extract SNI, ALPN,
//! and the fields that feed a JA3 fingerprint.

pub const TLS_HANDSHAKE_CONTENT_TYPE: u8 = 22;
pub const TLS_CLIENT_HELLO: u8 = 1;
pub const TLS_SERVER_HELLO: u8 = 2;

const EXT_SERVER_NAME: u16 = 0x0000;
const EXT_SUPPORTED_GROUPS: u16 = 0x000a;
const EXT_EC_POINT_FORMATS: u16 = 0x000b;
const EXT_ALPN: u16 = 0x0010;

#[derive(Debug, Default, Clone)]
pub struct ClientHelloInfo {
    pub version: u16,
    pub sni: Option<String>,
    pub alpn: Option<String>,
    pub ja3: String,
}

#[derive(Debug, Default, Clone)]
pub struct ServerHelloInfo {
    pub alpn: Option<String>,
}

#[derive(Debug)]
pub enum ParsedHello {
    Client(ClientHelloInfo),
    Server(ServerHelloInfo),
}

/// GREASE values (RFC 8701): reserved cipher-suite / extension-type /
/// named-group values of the form `0xNaNa`, deliberately excluded from
/// JA3 fingerprints.
pub fn is_grease_value(val: u16) -> bool {
    val != 0 && (val & !0xFAFA) == 0 && ((0x00FF & val) == (val >> 8))
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Some(s)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Option<u32> {
        self.take(3).map(|b| u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }
}

/// Attempts to parse `payload` as a TLS record carrying a ClientHello or
/// ServerHello handshake message. Returns `None` on anything that
/// doesn't look like one — the caller treats that as "do not attach an
/// extension", never an error.
pub fn parse_hello(payload: &[u8]) -> Option<ParsedHello> {
    let mut r = Reader::new(payload);
    let content_type = r.u8()?;
    if content_type != TLS_HANDSHAKE_CONTENT_TYPE {
        return None;
    }
    let _record_version = r.u16()?;
    let _record_len = r.u16()?;

    let handshake_type = r.u8()?;
    let _handshake_len = r.u24()?;

    match handshake_type {
        TLS_CLIENT_HELLO => parse_client_hello(&mut r).map(ParsedHello::Client),
        TLS_SERVER_HELLO => parse_server_hello(&mut r).map(ParsedHello::Server),
        _ => None,
    }
}

fn parse_client_hello(r: &mut Reader) -> Option<ClientHelloInfo> {
    let version = r.u16()?;
    r.skip(32)?; // random

    let session_id_len = r.u8()? as usize;
    r.skip(session_id_len)?;

    let cipher_suites_len = r.u16()? as usize;
    if cipher_suites_len % 2 != 0 {
        return None;
    }
    let mut ciphers = Vec::with_capacity(cipher_suites_len / 2);
    for _ in 0..(cipher_suites_len / 2) {
        let c = r.u16()?;
        if !is_grease_value(c) {
            ciphers.push(c);
        }
    }

    let compression_len = r.u8()? as usize;
    r.skip(compression_len)?;

    let mut sni = None;
    let mut alpn = None;
    let mut extensions = Vec::new();
    let mut curves = Vec::new();
    let mut ec_formats = Vec::new();

    if r.remaining() >= 2 {
        let ext_total_len = r.u16()? as usize;
        let ext_end = r.pos + ext_total_len.min(r.remaining());
        while r.pos < ext_end {
            let ext_type = r.u16()?;
            let ext_len = r.u16()? as usize;
            let ext_data = r.take(ext_len)?;
            if !is_grease_value(ext_type) {
                extensions.push(ext_type);
            }
            match ext_type {
                EXT_SERVER_NAME => sni = parse_sni(ext_data),
                EXT_SUPPORTED_GROUPS => curves = parse_u16_list(ext_data, true),
                EXT_EC_POINT_FORMATS => ec_formats = parse_u8_list(ext_data),
                EXT_ALPN => alpn = parse_alpn_first(ext_data),
                _ => {}
            }
        }
    }

    let ja3 = format!(
        "{},{},{},{},{}",
        version,
        join(&ciphers),
        join(&extensions),
        join(&curves),
        join_u8(&ec_formats),
    );

    Some(ClientHelloInfo {
        version,
        sni,
        alpn,
        ja3,
    })
}

fn parse_server_hello(r: &mut Reader) -> Option<ServerHelloInfo> {
    let _version = r.u16()?;
    r.skip(32)?;
    let session_id_len = r.u8()? as usize;
    r.skip(session_id_len)?;
    let _cipher_suite = r.u16()?;
    let _compression_method = r.u8()?;

    let mut alpn = None;
    if r.remaining() >= 2 {
        let ext_total_len = r.u16()? as usize;
        let ext_end = r.pos + ext_total_len.min(r.remaining());
        while r.pos < ext_end {
            let ext_type = r.u16()?;
            let ext_len = r.u16()? as usize;
            let ext_data = r.take(ext_len)?;
            if ext_type == EXT_ALPN {
                alpn = parse_alpn_first(ext_data);
            }
        }
    }
    Some(ServerHelloInfo { alpn })
}

fn parse_sni(data: &[u8]) -> Option<String> {
    let mut r = Reader::new(data);
    let _list_len = r.u16()?;
    let entry_type = r.u8()?;
    if entry_type != 0 {
        return None;
    }
    let name_len = r.u16()? as usize;
    let name = r.take(name_len)?;
    std::str::from_utf8(name).ok().map(|s| s.to_string())
}

fn parse_alpn_first(data: &[u8]) -> Option<String> {
    let mut r = Reader::new(data);
    let _list_len = r.u16()?;
    let proto_len = r.u8()? as usize;
    let proto = r.take(proto_len)?;
    std::str::from_utf8(proto).ok().map(|s| s.to_string())
}

fn parse_u16_list(data: &[u8], filter_grease: bool) -> Vec<u16> {
    let mut r = Reader::new(data);
    let list_len = r.u16().unwrap_or(0) as usize;
    let end = (2 + list_len).min(data.len());
    let mut out = Vec::new();
    while r.pos < end {
        match r.u16() {
            Some(v) if !filter_grease || !is_grease_value(v) => out.push(v),
            Some(_) => {}
            None => break,
        }
    }
    out
}

fn parse_u8_list(data: &[u8]) -> Vec<u8> {
    let mut r = Reader::new(data);
    let list_len = r.u8().unwrap_or(0) as usize;
    let end = (1 + list_len).min(data.len());
    let mut out = Vec::new();
    while r.pos < end {
        match r.u8() {
            Some(v) => out.push(v),
            None => break,
        }
    }
    out
}

fn join(values: &[u16]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("-")
}

fn join_u8(values: &[u8]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grease_values_are_recognized() {
        assert!(is_grease_value(0x0a0a));
        assert!(is_grease_value(0xfafa));
        assert!(!is_grease_value(0x0000));
        assert!(!is_grease_value(0x1301)); // TLS_AES_128_GCM_SHA256
    }

    fn push_u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_be_bytes());
    }

    fn build_client_hello(sni: &str, ciphers: &[u16]) -> Vec<u8> {
        let mut hs = Vec::new();
        push_u16(&mut hs, 0x0303); // client_version
        hs.extend_from_slice(&[0u8; 32]); // random
        hs.push(0); // session id len
        push_u16(&mut hs, (ciphers.len() * 2) as u16);
        for c in ciphers {
            push_u16(&mut hs, *c);
        }
        hs.push(1); // compression methods len
        hs.push(0); // null compression

        let mut sni_ext = Vec::new();
        push_u16(&mut sni_ext, (sni.len() + 3) as u16); // server name list len
        sni_ext.push(0); // name type: host_name
        push_u16(&mut sni_ext, sni.len() as u16);
        sni_ext.extend_from_slice(sni.as_bytes());

        let mut extensions = Vec::new();
        push_u16(&mut extensions, EXT_SERVER_NAME);
        push_u16(&mut extensions, sni_ext.len() as u16);
        extensions.extend_from_slice(&sni_ext);

        push_u16(&mut hs, extensions.len() as u16);
        hs.extend_from_slice(&extensions);

        let mut handshake = Vec::new();
        handshake.push(TLS_CLIENT_HELLO);
        let len = hs.len() as u32;
        handshake.extend_from_slice(&[(len >> 16) as u8, (len >> 8) as u8, len as u8]);
        handshake.extend_from_slice(&hs);

        let mut record = Vec::new();
        record.push(TLS_HANDSHAKE_CONTENT_TYPE);
        push_u16(&mut record, 0x0303);
        push_u16(&mut record, handshake.len() as u16);
        record.extend_from_slice(&handshake);
        record
    }

    #[test]
    fn parses_sni_and_ja3_from_client_hello() {
        let record = build_client_hello("example.com", &[0x1301, 0x0a0a, 0xc02f]);
        match parse_hello(&record) {
            Some(ParsedHello::Client(info)) => {
                assert_eq!(info.sni.as_deref(), Some("example.com"));
                assert!(info.ja3.starts_with("771,"));
                assert!(!info.ja3.contains("2570")); // 0x0a0a decimal, filtered
            }
            other => panic!("expected ClientHello, got {other:?}"),
        }
    }

    #[test]
    fn non_tls_payload_returns_none() {
        assert!(parse_hello(&[0, 1, 2, 3]).is_none());
    }
}
