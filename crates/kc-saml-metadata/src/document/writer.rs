//! Serializes an in-memory metadata tree.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::entity::{EntitiesDescriptor, EntityDescriptor, MetadataNode};
use super::{DocumentError, METADATA_NS};

pub(super) fn write_document(root: &MetadataNode) -> Result<Vec<u8>, DocumentError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    write(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    write_node(&mut writer, root, true)?;
    Ok(writer.into_inner())
}

fn write_node(
    writer: &mut Writer<Vec<u8>>,
    node: &MetadataNode,
    is_root: bool,
) -> Result<(), DocumentError> {
    match node {
        MetadataNode::Entity(entity) => write_entity(writer, entity, is_root),
        MetadataNode::Entities(group) => write_entities(writer, group, is_root),
    }
}

fn write_entities(
    writer: &mut Writer<Vec<u8>>,
    group: &EntitiesDescriptor,
    is_root: bool,
) -> Result<(), DocumentError> {
    let mut start = BytesStart::new("md:EntitiesDescriptor");
    if is_root {
        start.push_attribute(("xmlns:md", METADATA_NS));
    }
    if let Some(name) = &group.name {
        start.push_attribute(("Name", name.as_str()));
    }
    push_lifetime(&mut start, group.valid_until, group.cache_duration);

    write(writer, Event::Start(start))?;
    for member in &group.members {
        write_node(writer, member, false)?;
    }
    write(writer, Event::End(BytesEnd::new("md:EntitiesDescriptor")))
}

fn write_entity(
    writer: &mut Writer<Vec<u8>>,
    entity: &EntityDescriptor,
    is_root: bool,
) -> Result<(), DocumentError> {
    let mut start = BytesStart::new("md:EntityDescriptor");
    if is_root {
        start.push_attribute(("xmlns:md", METADATA_NS));
    }
    start.push_attribute(("entityID", entity.entity_id.as_str()));
    push_lifetime(&mut start, entity.valid_until, entity.cache_duration);
    write(writer, Event::Start(start))?;

    for role in &entity.roles {
        let name = format!("md:{}", role.role.element_name());
        let mut role_start = BytesStart::new(name.as_str());
        let protocols = role.protocol_support.join(" ");
        role_start.push_attribute(("protocolSupportEnumeration", protocols.as_str()));
        if let Some(valid_until) = role.valid_until {
            role_start.push_attribute(("validUntil", format_date_time(valid_until).as_str()));
        }
        write(writer, Event::Empty(role_start))?;
    }

    if let Some(organization) = &entity.organization_name {
        write(writer, Event::Start(BytesStart::new("md:Organization")))?;
        for element in ["md:OrganizationName", "md:OrganizationDisplayName"] {
            let mut name_start = BytesStart::new(element);
            name_start.push_attribute(("xml:lang", "en"));
            write(writer, Event::Start(name_start))?;
            write(writer, Event::Text(BytesText::new(organization)))?;
            write(writer, Event::End(BytesEnd::new(element)))?;
        }
        write(writer, Event::End(BytesEnd::new("md:Organization")))?;
    }

    write(writer, Event::End(BytesEnd::new("md:EntityDescriptor")))
}

fn push_lifetime(
    start: &mut BytesStart<'_>,
    valid_until: Option<DateTime<Utc>>,
    cache_duration: Option<Duration>,
) {
    if let Some(valid_until) = valid_until {
        start.push_attribute(("validUntil", format_date_time(valid_until).as_str()));
    }
    if let Some(cache_duration) = cache_duration {
        start.push_attribute(("cacheDuration", format_duration(cache_duration).as_str()));
    }
}

fn format_date_time(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn format_duration(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("PT{}S", duration.as_secs())
    } else {
        format!("PT{}.{:03}S", duration.as_secs(), duration.subsec_millis())
    }
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), DocumentError> {
    writer
        .write_event(event)
        .map_err(|e| DocumentError::Xml(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::super::{EntityRole, MetadataDocument, RoleDescriptor};
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn written_tree_parses_back() {
        let mut entity = EntityDescriptor::new("https://sp.example.org/shibboleth")
            .with_valid_until(Utc.with_ymd_and_hms(2031, 3, 1, 12, 0, 0).unwrap())
            .with_role(RoleDescriptor::new(
                EntityRole::SpSso,
                ["urn:oasis:names:tc:SAML:2.0:protocol"],
            ));
        entity.organization_name = Some("Example <Research>".to_string());

        let root = MetadataNode::Entities(EntitiesDescriptor {
            name: Some("local".to_string()),
            cache_duration: Some(Duration::from_secs(3600)),
            members: vec![MetadataNode::Entity(entity.clone())],
            ..EntitiesDescriptor::default()
        });

        let written = MetadataDocument::from_root(root.clone()).serialize().unwrap();
        let reparsed = MetadataDocument::parse(written).unwrap();

        assert_eq!(reparsed.root(), &root);
    }

    #[test]
    fn formats_fractional_durations() {
        assert_eq!(format_duration(Duration::from_secs(90)), "PT90S");
        assert_eq!(format_duration(Duration::from_millis(1500)), "PT1.500S");
    }
}
