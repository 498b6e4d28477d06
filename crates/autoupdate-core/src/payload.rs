// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Update response payloads

use crate::error::{Result, UpdateError};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use std::io::Cursor;

pub const RESPONSE_NAMESPACE: &str = "http://www.google.com/update2/response";
pub const PROTOCOL_VERSION: &str = "2.0";

/// Where and what to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOffer {
    pub codebase: String,
    /// Base64 digest of the artifact.
    pub hash: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateResponse {
    NoUpdate,
    Update(UpdateOffer),
}

impl UpdateResponse {
    pub fn is_update(&self) -> bool {
        matches!(self, Self::Update(_))
    }
}

/// Renders responses for one application id.
#[derive(Debug, Clone)]
pub struct PayloadFormatter {
    app_id: String,
}

impl PayloadFormatter {
    /// `app_id` is given without braces; they are added on output.
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
        }
    }

    pub fn render(&self, response: &UpdateResponse) -> Result<String> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        let app_id = format!("{{{}}}", self.app_id);

        let mut gupdate = BytesStart::new("gupdate");
        gupdate.push_attribute(("xmlns", RESPONSE_NAMESPACE));
        gupdate.push_attribute(("protocol", PROTOCOL_VERSION));

        let mut app = BytesStart::new("app");
        app.push_attribute(("appid", app_id.as_str()));
        app.push_attribute(("status", "ok"));

        let mut ping = BytesStart::new("ping");
        ping.push_attribute(("status", "ok"));

        let mut updatecheck = BytesStart::new("updatecheck");
        match response {
            UpdateResponse::Update(offer) => {
                let size = offer.size.to_string();
                updatecheck.push_attribute(("codebase", offer.codebase.as_str()));
                updatecheck.push_attribute(("hash", offer.hash.as_str()));
                updatecheck.push_attribute(("needsadmin", "false"));
                updatecheck.push_attribute(("size", size.as_str()));
                updatecheck.push_attribute(("status", "ok"));
            }
            UpdateResponse::NoUpdate => {
                updatecheck.push_attribute(("status", "noupdate"));
            }
        }

        let events = [
            Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
            Event::Start(gupdate),
            Event::Start(app),
            Event::Empty(ping),
            Event::Empty(updatecheck),
            Event::End(BytesEnd::new("app")),
            Event::End(BytesEnd::new("gupdate")),
        ];
        for event in events {
            writer
                .write_event(event)
                .map_err(|e| UpdateError::Render(e.to_string()))?;
        }

        String::from_utf8(writer.into_inner().into_inner())
            .map_err(|e| UpdateError::Render(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::Reader;
    use std::collections::HashMap;

    const APP_ID: &str = "87efface-864d-49a5-9bb3-4b050a7c227a";

    fn attributes_of(xml: &str, name: &[u8]) -> HashMap<String, String> {
        let mut reader = Reader::from_str(xml);
        loop {
            match reader.read_event().unwrap() {
                Event::Start(e) | Event::Empty(e) if e.name().as_ref() == name => {
                    return e
                        .attributes()
                        .map(|a| {
                            let a = a.unwrap();
                            (
                                String::from_utf8(a.key.as_ref().to_vec()).unwrap(),
                                a.unescape_value().unwrap().into_owned(),
                            )
                        })
                        .collect();
                }
                Event::Eof => panic!("element not found"),
                _ => {}
            }
        }
    }

    #[test]
    fn test_update_payload_round_trip() {
        let offer = UpdateOffer {
            codebase: "http://devserver:8080/static/update.gz".to_owned(),
            hash: "AtiI8B64agHVN+yeBAyiNMX3+HM=".to_owned(),
            size: 123_456_789,
        };
        let xml = PayloadFormatter::new(APP_ID)
            .render(&UpdateResponse::Update(offer.clone()))
            .unwrap();

        let check = attributes_of(&xml, b"updatecheck");
        assert_eq!(check["codebase"], offer.codebase);
        assert_eq!(check["hash"], offer.hash);
        assert_eq!(check["size"], "123456789");
        assert_eq!(check["needsadmin"], "false");
        assert_eq!(check["status"], "ok");
    }

    #[test]
    fn test_envelope() {
        let xml = PayloadFormatter::new(APP_ID)
            .render(&UpdateResponse::NoUpdate)
            .unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));

        let root = attributes_of(&xml, b"gupdate");
        assert_eq!(root["xmlns"], RESPONSE_NAMESPACE);
        assert_eq!(root["protocol"], "2.0");

        let app = attributes_of(&xml, b"app");
        assert_eq!(app["appid"], format!("{{{APP_ID}}}"));
        assert_eq!(app["status"], "ok");

        assert_eq!(attributes_of(&xml, b"ping")["status"], "ok");
    }

    #[test]
    fn test_no_update_payload() {
        let xml = PayloadFormatter::new(APP_ID)
            .render(&UpdateResponse::NoUpdate)
            .unwrap();
        let check = attributes_of(&xml, b"updatecheck");
        assert_eq!(check.len(), 1);
        assert_eq!(check["status"], "noupdate");
    }

    #[test]
    fn test_codebase_is_escaped() {
        let offer = UpdateOffer {
            codebase: "http://host/static/a&b\"c.gz".to_owned(),
            hash: "x".to_owned(),
            size: 1,
        };
        let xml = PayloadFormatter::new(APP_ID)
            .render(&UpdateResponse::Update(offer))
            .unwrap();
        assert!(xml.contains("a&amp;b&quot;c.gz"));
        assert_eq!(
            attributes_of(&xml, b"updatecheck")["codebase"],
            "http://host/static/a&b\"c.gz"
        );
    }
}
