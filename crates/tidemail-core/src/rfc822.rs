//! Message metadata extraction from raw RFC 822 data

use crate::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use mail_parser::{HeaderValue, MessageParser, MessagePart, MimeHeaders, PartType};
use std::collections::HashMap;
use tidemail_worker::{Address, BodyStructure, Envelope, MessageInfo};

/// Content-Type parameters carried into the body structure
const PARAMS: [&str; 4] = ["charset", "name", "format", "boundary"];

/// Build a [`MessageInfo`] from a raw message.
///
/// Flags and internal date are not part of the message and stay empty.
pub fn parse_message_info(uid: u32, raw: &[u8]) -> CoreResult<MessageInfo> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| CoreError::Parse(format!("uid {}: not an RFC 822 message", uid)))?;

    let envelope = Envelope {
        date: message
            .date()
            .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0)),
        subject: message.subject().unwrap_or_default().to_string(),
        from: addresses(message.from()),
        reply_to: addresses(message.reply_to()),
        to: addresses(message.to()),
        cc: addresses(message.cc()),
        bcc: addresses(message.bcc()),
        message_id: message.message_id().unwrap_or_default().to_string(),
        in_reply_to: text_values(message.in_reply_to())
            .into_iter()
            .next()
            .unwrap_or_default(),
    };

    let body_structure = message
        .parts
        .first()
        .map(|root| body_structure(&message, root, 0));

    Ok(MessageInfo {
        uid,
        envelope: Some(envelope),
        size: raw.len().try_into().unwrap_or(u32::MAX),
        body_structure,
        references: text_values(message.references()),
        ..Default::default()
    })
}

fn addresses(value: Option<&mail_parser::Address<'_>>) -> Vec<Address> {
    let Some(value) = value else {
        return Vec::new();
    };
    let convert = |addr: &mail_parser::Addr<'_>| {
        addr.address.as_ref().map(|a| {
            Address::new(
                addr.name.as_ref().map(|n| n.to_string()).filter(|n| !n.is_empty()),
                a.to_string(),
            )
        })
    };
    match value {
        mail_parser::Address::List(list) => list.iter().filter_map(convert).collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|g| g.addresses.iter())
            .filter_map(convert)
            .collect(),
    }
}

fn text_values(value: &HeaderValue<'_>) -> Vec<String> {
    match value {
        HeaderValue::Text(text) => vec![text.to_string()],
        HeaderValue::TextList(list) => list.iter().map(|t| t.to_string()).collect(),
        _ => Vec::new(),
    }
}

fn body_structure(message: &mail_parser::Message<'_>, part: &MessagePart<'_>, depth: usize) -> BodyStructure {
    let (mime_type, mime_subtype, params) = match part.content_type() {
        Some(ct) => {
            let params: HashMap<String, String> = PARAMS
                .iter()
                .filter_map(|name| ct.attribute(name).map(|v| (name.to_string(), v.to_string())))
                .collect();
            (
                ct.ctype().to_lowercase(),
                ct.subtype().unwrap_or_default().to_lowercase(),
                params,
            )
        }
        None => ("text".to_string(), "plain".to_string(), HashMap::new()),
    };

    let parts = match &part.body {
        // Nesting is bounded so hostile input cannot recurse without limit
        PartType::Multipart(children) if depth < 16 => children
            .iter()
            .filter_map(|&id| message.part(id))
            .map(|child| body_structure(message, child, depth + 1))
            .collect(),
        _ => Vec::new(),
    };

    BodyStructure {
        mime_type,
        mime_subtype,
        params,
        encoding: part.content_transfer_encoding().map(str::to_lowercase),
        disposition: part.content_disposition().map(|d| d.ctype().to_lowercase()),
        parts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = "From: Alice Example <alice@example.com>\r\n\
To: bob@example.com, Carol <carol@example.com>\r\n\
Subject: Re: Lunch\r\n\
Date: Tue, 5 Mar 2024 10:30:00 +0000\r\n\
Message-ID: <reply-1@example.com>\r\n\
In-Reply-To: <root@example.com>\r\n\
References: <older@example.com> <root@example.com>\r\n\
Content-Type: multipart/mixed; boundary=\"sep\"\r\n\
\r\n\
--sep\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Sounds good.\r\n\
--sep\r\n\
Content-Type: application/pdf; name=\"menu.pdf\"\r\n\
Content-Disposition: attachment; filename=\"menu.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQK\r\n\
--sep--\r\n";

    #[test]
    fn test_parse_reply() {
        let info = parse_message_info(12, REPLY.as_bytes()).unwrap();
        let envelope = info.envelope.as_ref().unwrap();

        assert_eq!(info.uid, 12);
        assert_eq!(envelope.subject, "Re: Lunch");
        assert_eq!(envelope.from[0].name.as_deref(), Some("Alice Example"));
        assert_eq!(envelope.from[0].address, "alice@example.com");
        assert_eq!(envelope.to.len(), 2);
        assert_eq!(envelope.message_id, "reply-1@example.com");
        assert_eq!(envelope.in_reply_to, "root@example.com");
        assert_eq!(info.references, vec!["older@example.com", "root@example.com"]);
        assert_eq!(info.parent_ids(), vec!["older@example.com", "root@example.com"]);
        assert_eq!(
            envelope.date.unwrap().to_rfc3339(),
            "2024-03-05T10:30:00+00:00"
        );
        assert_eq!(info.size as usize, REPLY.len());
    }

    #[test]
    fn test_body_structure() {
        let info = parse_message_info(1, REPLY.as_bytes()).unwrap();
        let body = info.body_structure.unwrap();

        assert_eq!(body.full_mime_type(), "multipart/mixed");
        assert_eq!(body.parts.len(), 2);
        assert_eq!(body.part_at(&[1]).unwrap().params.get("charset").map(String::as_str), Some("utf-8"));
        let pdf = body.part_at(&[2]).unwrap();
        assert_eq!(pdf.full_mime_type(), "application/pdf");
        assert_eq!(pdf.encoding.as_deref(), Some("base64"));
        assert!(body.has_attachments());
    }
}
