//! Shared fixtures for unit tests.

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const SAMPLE_SPL_GUID: &str = "5a0e6f1c-8b2d-4c3e-9f10-2a3b4c5d6e01";

/// A labeling document with nested sections, a repeated section id, one
/// product (two ingredients, two packaging levels, one approval) and a
/// labeler with one establishment.
pub const SAMPLE_SPL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<document xmlns="urn:hl7-org:v3" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <id root="5a0e6f1c-8b2d-4c3e-9f10-2a3b4c5d6e01"/>
  <code code="34391-3" codeSystem="2.16.840.1.113883.6.1" displayName="HUMAN OTC DRUG LABEL"/>
  <title>Acme Pain Relief <br/>Tablets</title>
  <effectiveTime value="20240115"/>
  <setId root="7c1d2e3f-4a5b-4c6d-8e7f-9a0b1c2d3e4f"/>
  <versionNumber value="3"/>
  <author>
    <assignedEntity>
      <representedOrganization>
        <id extension="123456789" root="1.3.6.1.4.1.519.1"/>
        <name>Acme Pharma Inc.</name>
        <assignedEntity>
          <assignedOrganization>
            <id extension="987654321" root="1.3.6.1.4.1.519.1"/>
            <name>Acme Plant One</name>
          </assignedOrganization>
          <performance>
            <actDefinition>
              <code code="C43360" codeSystem="2.16.840.1.113883.3.26.1.1" displayName="MANUFACTURE"/>
            </actDefinition>
          </performance>
          <performance>
            <actDefinition>
              <code code="C84731" codeSystem="2.16.840.1.113883.3.26.1.1" displayName="PACK"/>
            </actDefinition>
          </performance>
        </assignedEntity>
      </representedOrganization>
    </assignedEntity>
  </author>
  <component>
    <structuredBody>
      <component>
        <section>
          <id root="11111111-1111-4111-8111-111111111111"/>
          <code code="34067-9" codeSystem="2.16.840.1.113883.6.1" displayName="INDICATIONS &amp; USAGE SECTION"/>
          <title>1 INDICATIONS AND USAGE</title>
          <text><paragraph>For the temporary relief of minor aches and pains.</paragraph></text>
          <effectiveTime value="20240115"/>
          <component>
            <section>
              <id root="22222222-2222-4222-8222-222222222222"/>
              <title>1.1 Adults</title>
              <text>Adults and children 12 years and over.</text>
            </section>
          </component>
          <component>
            <section>
              <title>1.2 Children</title>
              <text>Ask a doctor.</text>
            </section>
          </component>
        </section>
      </component>
      <component>
        <section>
          <id root="33333333-3333-4333-8333-333333333333"/>
          <code code="48780-1" codeSystem="2.16.840.1.113883.6.1" displayName="SPL PRODUCT DATA ELEMENTS SECTION"/>
          <title>PRODUCT DATA</title>
          <subject>
            <manufacturedProduct>
              <manufacturedProduct>
                <code code="50580-600" codeSystem="2.16.840.1.113883.6.69"/>
                <name>Acme Pain Relief</name>
                <formCode code="C42998" codeSystem="2.16.840.1.113883.3.26.1.1" displayName="TABLET"/>
                <ingredient classCode="ACTIB">
                  <quantity>
                    <numerator value="500" unit="mg"/>
                    <denominator value="1" unit="1"/>
                  </quantity>
                  <ingredientSubstance>
                    <code code="362O9ITL9D" codeSystem="2.16.840.1.113883.4.9"/>
                    <name>ACETAMINOPHEN</name>
                  </ingredientSubstance>
                </ingredient>
                <ingredient classCode="IACT">
                  <ingredientSubstance>
                    <code code="ETJ7Z6XBU4" codeSystem="2.16.840.1.113883.4.9"/>
                    <name>SILICON DIOXIDE</name>
                  </ingredientSubstance>
                </ingredient>
                <asContent>
                  <quantity>
                    <numerator value="100" unit="1"/>
                    <denominator value="1" unit="1"/>
                  </quantity>
                  <containerPackagedProduct>
                    <code code="50580-600-01" codeSystem="2.16.840.1.113883.6.69"/>
                    <formCode code="C43169" codeSystem="2.16.840.1.113883.3.26.1.1" displayName="BOTTLE"/>
                    <asContent>
                      <quantity>
                        <numerator value="1" unit="1"/>
                        <denominator value="1" unit="1"/>
                      </quantity>
                      <containerPackagedProduct>
                        <code code="50580-600-02" codeSystem="2.16.840.1.113883.6.69"/>
                        <formCode code="C43178" codeSystem="2.16.840.1.113883.3.26.1.1" displayName="CARTON"/>
                      </containerPackagedProduct>
                    </asContent>
                  </containerPackagedProduct>
                </asContent>
              </manufacturedProduct>
              <subjectOf>
                <approval>
                  <id extension="ANDA078546" root="2.16.840.1.113883.3.150"/>
                  <code code="C73584" codeSystem="2.16.840.1.113883.3.26.1.1" displayName="ANDA"/>
                </approval>
              </subjectOf>
            </manufacturedProduct>
          </subject>
        </section>
      </component>
      <component>
        <section>
          <id root="44444444-4444-4444-8444-444444444444"/>
          <title>2 SEE ALSO</title>
          <component>
            <section>
              <id root="22222222-2222-4222-8222-222222222222"/>
              <title>1.1 Adults</title>
            </section>
          </component>
        </section>
      </component>
    </structuredBody>
  </component>
</document>
"#;

/// Minimal document around a structured body.
pub fn spl_document(guid: &str, body: &str) -> String {
    format!(
        r#"<document>
  <id root="{guid}"/>
  <code code="34391-3" codeSystem="2.16.840.1.113883.6.1"/>
  <title>Fixture</title>
  <versionNumber value="1"/>
  <component><structuredBody>{body}</structuredBody></component>
</document>"#
    )
}

/// Build an in-memory zip from `(entry name, bytes)` pairs.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, bytes) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Like [`zip_bytes`], but without compression so entry data can be
/// located and damaged in place.
pub fn stored_zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, bytes) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Flip one byte of a stored entry's data so its CRC no longer matches.
pub fn corrupt_stored_entry(mut bytes: Vec<u8>, marker: &[u8]) -> Vec<u8> {
    let at = bytes
        .windows(marker.len())
        .position(|w| w == marker)
        .unwrap();
    bytes[at] ^= 0x20;
    bytes
}
