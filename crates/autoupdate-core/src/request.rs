// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Update ping request parsing

use crate::error::{Result, UpdateError};
use crate::version::FORCED_UPDATE;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

/// Board assumed when the ping does not name one.
pub const DEFAULT_BOARD: &str = "x86-generic";

/// One client check-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub client_version: String,
    pub channel: String,
    pub board_id: String,
    pub requested_label: Option<String>,
}

impl UpdateRequest {
    /// Parse a ping body. The first element named `app` (any namespace
    /// prefix) carries the `version`, `track` and optional `board` attributes.
    /// The whole body must be a well-formed document.
    pub fn parse(body: &str) -> Result<Self> {
        let mut reader = Reader::from_str(body);
        let mut request = None;
        let mut depth = 0_usize;
        let mut seen_root = false;

        loop {
            let event = reader.read_event().map_err(|e| {
                malformed(format!(
                    "invalid XML at position {}: {e}",
                    reader.buffer_position()
                ))
            })?;
            match event {
                Event::Start(ref element) | Event::Empty(ref element) => {
                    if depth == 0 && seen_root {
                        return Err(malformed("content after the root element"));
                    }
                    seen_root = true;
                    if request.is_none() && element.local_name().as_ref() == b"app" {
                        request = Some(Self::from_app_element(element)?);
                    }
                    if matches!(event, Event::Start(_)) {
                        depth += 1;
                    }
                }
                Event::End(_) => depth = depth.saturating_sub(1),
                Event::Text(ref text)
                    if depth == 0 && !text.iter().all(u8::is_ascii_whitespace) =>
                {
                    return Err(malformed("text outside the root element"));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if depth > 0 {
            return Err(malformed("document ends inside an element"));
        }
        request.ok_or_else(|| malformed("no app element in ping"))
    }

    fn from_app_element(element: &BytesStart<'_>) -> Result<Self> {
        let mut client_version = None;
        let mut channel = None;
        let mut board_id = None;

        for attr in element.attributes() {
            let attr = attr.map_err(|e| malformed(format!("invalid attribute: {e}")))?;
            let value = attr
                .unescape_value()
                .map_err(|e| malformed(format!("invalid attribute: {e}")))?
                .into_owned();
            match attr.key.local_name().as_ref() {
                b"version" => client_version = Some(value),
                b"track" => channel = Some(value),
                b"board" => board_id = Some(value),
                _ => {}
            }
        }

        let client_version =
            client_version.ok_or_else(|| malformed("app element has no version"))?;
        let channel = channel.ok_or_else(|| malformed("app element has no track"))?;
        let board_id = board_id
            .filter(|board| !board.is_empty())
            .unwrap_or_else(|| DEFAULT_BOARD.to_owned());

        Ok(Self {
            client_version,
            channel,
            board_id,
            requested_label: None,
        })
    }

    /// Attach the label taken from the request path (`/update/<label>`).
    #[must_use]
    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.requested_label = label.filter(|l| !l.is_empty());
        self
    }

    pub fn is_forced(&self) -> bool {
        self.client_version == FORCED_UPDATE
    }
}

fn malformed(reason: impl Into<String>) -> UpdateError {
    UpdateError::MalformedRequest(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<o:gupdate xmlns:o="http://www.google.com/update2/request" version="MementoSoftwareUpdate-0.1.0.0" protocol="2.0" ismachine="0">
  <o:os version="Memento" platform="memento" sp="0.9.74.1_i686"></o:os>
  <o:app appid="{87efface-864d-49a5-9bb3-4b050a7c227a}" version="0.9.74.1" lang="en-US" track="dev-channel" board="x86-mario">
    <o:ping active="1"></o:ping>
    <o:updatecheck></o:updatecheck>
  </o:app>
</o:gupdate>"#;

    #[test]
    fn test_parse_ping() {
        let request = UpdateRequest::parse(PING).unwrap();
        assert_eq!(request.client_version, "0.9.74.1");
        assert_eq!(request.channel, "dev-channel");
        assert_eq!(request.board_id, "x86-mario");
        assert!(request.requested_label.is_none());
        assert!(!request.is_forced());
    }

    #[test]
    fn test_board_defaults_when_absent_or_empty() {
        let body = r#"<gupdate><app version="1.2.3.4" track="release-channel"/></gupdate>"#;
        assert_eq!(UpdateRequest::parse(body).unwrap().board_id, DEFAULT_BOARD);

        let body = r#"<gupdate><app version="1.2.3.4" track="release-channel" board=""/></gupdate>"#;
        assert_eq!(UpdateRequest::parse(body).unwrap().board_id, DEFAULT_BOARD);
    }

    #[test]
    fn test_forced_update_sentinel() {
        let body = r#"<gupdate><app version="ForcedUpdate" track="dev-channel"/></gupdate>"#;
        assert!(UpdateRequest::parse(body).unwrap().is_forced());
    }

    #[test]
    fn test_with_label() {
        let body = r#"<gupdate><app version="1.2.3.4" track="dev-channel"/></gupdate>"#;
        let request = UpdateRequest::parse(body).unwrap();
        let labelled = request.clone().with_label(Some("R9-build".to_owned()));
        assert_eq!(labelled.requested_label.as_deref(), Some("R9-build"));
        assert!(request.with_label(Some(String::new())).requested_label.is_none());
    }

    #[test]
    fn test_malformed_requests() {
        for body in [
            "",
            "not xml at all",
            "<gupdate><os version=\"1\"/></gupdate>",
            "<gupdate><app track=\"dev-channel\"/></gupdate>",
            "<gupdate><app version=\"1.2.3.4\"/></gupdate>",
            "<gupdate></os><app version=\"1.2.3.4\" track=\"x\"/></gupdate>",
            // Truncated after a complete app element.
            "<o:gupdate xmlns:o=\"http://www.google.com/update2/request\"><o:app version=\"1.2.3.4\" track=\"dev-channel\"/><o:ping",
            "<gupdate><app version=\"1.2.3.4\" track=\"x\"/>",
            "<gupdate><app version=\"1.2.3.4\" track=\"x\"/></gupdate><gupdate/>",
            "<gupdate><app version=\"1.2.3.4\" track=\"x\"/></gupdate>trailing",
        ] {
            let err = UpdateRequest::parse(body).unwrap_err();
            assert!(
                matches!(err, UpdateError::MalformedRequest(_)),
                "{body:?} gave {err}"
            );
        }
    }
}
