//! Shared fixtures for resolver integration tests.

#![allow(dead_code)]

/// Installs a test subscriber once per binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("kc_saml_metadata=debug")
        .with_test_writer()
        .try_init();
}

/// Renders a single-entity document with one IdP role.
pub fn entity_document(entity_id: &str) -> String {
    format!(
        r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{entity_id}">
    <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol"/>
</md:EntityDescriptor>"#
    )
}

/// Renders a federation aggregate with one IdP and one SP.
pub fn federation_document(idp: &str, sp: &str) -> String {
    format!(
        r#"<md:EntitiesDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" Name="urn:example:federation" cacheDuration="PT6H">
    <md:EntityDescriptor entityID="{idp}">
        <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol"/>
    </md:EntityDescriptor>
    <md:EntityDescriptor entityID="{sp}">
        <md:SPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol"/>
    </md:EntityDescriptor>
</md:EntitiesDescriptor>"#
    )
}
