//! Streaming metadata parser built on `quick-xml`.
//!
//! Elements are matched by local name, so any namespace prefix is accepted.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::entity::{EntitiesDescriptor, EntityDescriptor, EntityRole, MetadataNode, RoleDescriptor};
use super::xsd::{parse_date_time, parse_duration};
use super::DocumentError;

enum Frame {
    Entities(EntitiesDescriptor),
    Entity {
        entity: EntityDescriptor,
        display_name_seen: bool,
    },
    Organization,
    OrganizationName {
        display: bool,
    },
    Other,
}

pub(super) fn parse_tree(xml: &[u8]) -> Result<MetadataNode, DocumentError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<MetadataNode> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                let frame = open_element(&start, &mut stack, root.is_some())?;
                stack.push(frame);
            }
            Event::Empty(start) => {
                let frame = open_element(&start, &mut stack, root.is_some())?;
                close_frame(frame, &mut stack, &mut root);
            }
            Event::End(_) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| DocumentError::Xml("unbalanced end tag".to_string()))?;
                close_frame(frame, &mut stack, &mut root);
            }
            Event::Text(text) => {
                if let Some(Frame::OrganizationName { display }) = stack.last() {
                    let display = *display;
                    let value = text.unescape()?.into_owned();
                    set_organization_name(&mut stack, value, display);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(DocumentError::Xml("unexpected end of document".to_string()));
    }
    root.ok_or_else(|| DocumentError::NotMetadata("document has no root element".to_string()))
}

fn open_element(
    start: &BytesStart<'_>,
    stack: &mut [Frame],
    has_root: bool,
) -> Result<Frame, DocumentError> {
    let name = element_name(start)?;

    let Some(parent) = stack.last_mut() else {
        if has_root {
            return Err(DocumentError::Xml("multiple root elements".to_string()));
        }
        return match name.as_str() {
            "EntityDescriptor" => read_entity(start),
            "EntitiesDescriptor" => read_entities(start),
            other => Err(DocumentError::NotMetadata(format!(
                "root element <{other}> is neither EntityDescriptor nor EntitiesDescriptor"
            ))),
        };
    };

    let frame = match (parent, name.as_str()) {
        (Frame::Entities(_), "EntityDescriptor") => read_entity(start)?,
        (Frame::Entities(_), "EntitiesDescriptor") => read_entities(start)?,
        (Frame::Entity { .. }, "Organization") => Frame::Organization,
        (Frame::Entity { entity, .. }, other) => {
            if let Some(role) = EntityRole::from_element(other) {
                entity.roles.push(read_role(start, role)?);
            }
            Frame::Other
        }
        (Frame::Organization, "OrganizationDisplayName") => Frame::OrganizationName { display: true },
        (Frame::Organization, "OrganizationName") => Frame::OrganizationName { display: false },
        _ => Frame::Other,
    };
    Ok(frame)
}

fn close_frame(frame: Frame, stack: &mut [Frame], root: &mut Option<MetadataNode>) {
    let node = match frame {
        Frame::Entity { entity, .. } => MetadataNode::Entity(entity),
        Frame::Entities(group) => MetadataNode::Entities(group),
        _ => return,
    };
    match stack.last_mut() {
        Some(Frame::Entities(parent)) => parent.members.push(node),
        None => *root = Some(node),
        Some(_) => {}
    }
}

/// Display names win over plain names; the first of each kind is kept.
fn set_organization_name(stack: &mut [Frame], value: String, display: bool) {
    let entity_frame = stack.iter_mut().rev().find_map(|frame| match frame {
        Frame::Entity {
            entity,
            display_name_seen,
        } => Some((entity, display_name_seen)),
        _ => None,
    });
    let Some((entity, display_name_seen)) = entity_frame else {
        return;
    };

    if display && !*display_name_seen {
        entity.organization_name = Some(value);
        *display_name_seen = true;
    } else if !display && entity.organization_name.is_none() {
        entity.organization_name = Some(value);
    }
}

fn read_entity(start: &BytesStart<'_>) -> Result<Frame, DocumentError> {
    let mut entity_id = None;
    let mut entity = EntityDescriptor::new(String::new());

    for (key, value) in attributes(start)? {
        match key.as_str() {
            "entityID" => entity_id = Some(value),
            "validUntil" => entity.valid_until = Some(parse_date_time(&value)?),
            "cacheDuration" => entity.cache_duration = Some(parse_duration(&value)?),
            _ => {}
        }
    }

    entity.entity_id = entity_id
        .filter(|id| !id.trim().is_empty())
        .ok_or(DocumentError::MissingAttribute {
            element: "EntityDescriptor",
            attribute: "entityID",
        })?;

    Ok(Frame::Entity {
        entity,
        display_name_seen: false,
    })
}

fn read_entities(start: &BytesStart<'_>) -> Result<Frame, DocumentError> {
    let mut group = EntitiesDescriptor::default();

    for (key, value) in attributes(start)? {
        match key.as_str() {
            "Name" => group.name = Some(value),
            "validUntil" => group.valid_until = Some(parse_date_time(&value)?),
            "cacheDuration" => group.cache_duration = Some(parse_duration(&value)?),
            _ => {}
        }
    }

    Ok(Frame::Entities(group))
}

fn read_role(start: &BytesStart<'_>, role: EntityRole) -> Result<RoleDescriptor, DocumentError> {
    let mut descriptor = RoleDescriptor::new(role, Vec::<String>::new());

    for (key, value) in attributes(start)? {
        match key.as_str() {
            "protocolSupportEnumeration" => {
                descriptor.protocol_support = value.split_whitespace().map(str::to_string).collect();
            }
            "validUntil" => descriptor.valid_until = Some(parse_date_time(&value)?),
            _ => {}
        }
    }

    Ok(descriptor)
}

fn element_name(start: &BytesStart<'_>) -> Result<String, DocumentError> {
    std::str::from_utf8(start.local_name().as_ref())
        .map(str::to_string)
        .map_err(|e| DocumentError::Xml(e.to_string()))
}

/// Returns non-namespace attributes as `(local name, unescaped value)` pairs.
fn attributes(start: &BytesStart<'_>) -> Result<Vec<(String, String)>, DocumentError> {
    let mut pairs = Vec::new();
    for attr in start.attributes() {
        let attr = attr?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let key = std::str::from_utf8(attr.key.local_name().as_ref())
            .map_err(|e| DocumentError::Xml(e.to_string()))?
            .to_string();
        let value = attr.unescape_value()?.into_owned();
        pairs.push((key, value));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> Result<MetadataNode, DocumentError> {
        parse_tree(xml.as_bytes())
    }

    #[test]
    fn parses_single_entity_with_roles() {
        let node = parse(
            r#"<EntityDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata" entityID="https://idp.example.org">
                <IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol urn:oasis:names:tc:SAML:1.1:protocol">
                    <SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="https://idp.example.org/sso"/>
                </IDPSSODescriptor>
                <AttributeAuthorityDescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol"/>
                <Organization>
                    <OrganizationName xml:lang="en">example</OrganizationName>
                    <OrganizationDisplayName xml:lang="en">Example &amp; Co</OrganizationDisplayName>
                </Organization>
            </EntityDescriptor>"#,
        )
        .unwrap();

        let MetadataNode::Entity(entity) = node else {
            panic!("expected entity root");
        };
        assert_eq!(entity.entity_id, "https://idp.example.org");
        assert_eq!(entity.roles.len(), 2);
        assert_eq!(entity.roles[0].role, EntityRole::IdpSso);
        assert_eq!(entity.roles[0].protocol_support.len(), 2);
        assert_eq!(entity.roles[1].role, EntityRole::AttributeAuthority);
        assert_eq!(entity.organization_name.as_deref(), Some("Example & Co"));
    }

    #[test]
    fn parses_nested_containers_in_order() {
        let node = parse(
            r#"<md:EntitiesDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata">
                <md:EntityDescriptor entityID="a"/>
                <md:EntitiesDescriptor Name="inner">
                    <md:EntityDescriptor entityID="b"/>
                </md:EntitiesDescriptor>
                <md:EntityDescriptor entityID="c"/>
            </md:EntitiesDescriptor>"#,
        )
        .unwrap();

        let MetadataNode::Entities(group) = node else {
            panic!("expected container root");
        };
        assert_eq!(group.members.len(), 3);
        assert!(matches!(&group.members[1], MetadataNode::Entities(inner) if inner.name.as_deref() == Some("inner")));
        assert_eq!(MetadataNode::Entities(group).entity_count(), 3);
    }

    #[test]
    fn rejects_non_metadata_root() {
        let err = parse("<html><body/></html>").unwrap_err();
        assert!(matches!(err, DocumentError::NotMetadata(_)));
    }

    #[test]
    fn rejects_missing_entity_id() {
        let err = parse(r#"<EntityDescriptor validUntil="2030-01-01T00:00:00Z"/>"#).unwrap_err();
        assert!(matches!(err, DocumentError::MissingAttribute { attribute: "entityID", .. }));
    }

    #[test]
    fn rejects_malformed_xml() {
        assert!(matches!(
            parse(r#"<EntityDescriptor entityID="a"><IDPSSODescriptor></EntityDescriptor>"#),
            Err(DocumentError::Xml(_))
        ));
        assert!(matches!(parse(""), Err(DocumentError::NotMetadata(_))));
    }

    #[test]
    fn rejects_bad_attribute_values() {
        assert!(matches!(
            parse(r#"<EntityDescriptor entityID="a" validUntil="soon"/>"#),
            Err(DocumentError::InvalidDateTime(_))
        ));
        assert!(matches!(
            parse(r#"<EntityDescriptor entityID="a" cacheDuration="6 hours"/>"#),
            Err(DocumentError::InvalidDuration(_))
        ));
    }

    #[test]
    fn ignores_entities_nested_in_extensions() {
        let node = parse(
            r#"<EntityDescriptor entityID="outer">
                <Extensions><EntityDescriptor entityID="inner"/></Extensions>
            </EntityDescriptor>"#,
        )
        .unwrap();
        assert_eq!(node.entity_count(), 1);
    }
}
