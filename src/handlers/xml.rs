//! Hand-written S3 XML documents.

use crate::services::gateway_service::{BucketContents, BucketListing};
use chrono::{DateTime, SecondsFormat, Utc};

pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// `ListAllMyBucketsResult` for GET `/`.
pub fn build_list_buckets_xml(listing: &BucketListing) -> String {
    let mut xml = String::from(XML_DECLARATION);
    xml.push_str(&format!(r#"<ListAllMyBucketsResult xmlns="{S3_XMLNS}">"#));
    xml.push_str(&format!(
        "<Owner><ID>{}</ID><DisplayName>{}</DisplayName></Owner>",
        xml_escape(&listing.owner.id),
        xml_escape(&listing.owner.display_name)
    ));
    xml.push_str("<Buckets>");
    for bucket in &listing.buckets {
        xml.push_str("<Bucket>");
        xml.push_str(&format!("<Name>{}</Name>", xml_escape(&bucket.name)));
        xml.push_str(&format!(
            "<CreationDate>{}</CreationDate>",
            timestamp(&bucket.creation_date)
        ));
        xml.push_str("</Bucket>");
    }
    xml.push_str("</Buckets></ListAllMyBucketsResult>");
    xml
}

/// `ListBucketResult` for GET `/{bucket}`. Every key is returned in one page.
pub fn build_list_objects_xml(contents: &BucketContents) -> String {
    let mut xml = String::from(XML_DECLARATION);
    xml.push_str(&format!(r#"<ListBucketResult xmlns="{S3_XMLNS}">"#));
    xml.push_str(&format!("<Name>{}</Name>", xml_escape(&contents.bucket)));
    xml.push_str("<Prefix></Prefix>");
    xml.push_str(&format!("<KeyCount>{}</KeyCount>", contents.objects.len()));
    xml.push_str(&format!(
        "<MaxKeys>{}</MaxKeys>",
        contents.objects.len().max(1000)
    ));
    xml.push_str("<IsTruncated>false</IsTruncated>");

    for obj in &contents.objects {
        xml.push_str("<Contents>");
        xml.push_str(&format!("<Key>{}</Key>", xml_escape(&obj.key)));
        xml.push_str(&format!(
            "<LastModified>{}</LastModified>",
            timestamp(&obj.record.last_modified)
        ));
        xml.push_str(&format!(
            "<ETag>&quot;{}&quot;</ETag>",
            xml_escape(&obj.record.etag)
        ));
        xml.push_str(&format!("<Size>{}</Size>", obj.record.size));
        xml.push_str("<StorageClass>STANDARD</StorageClass>");
        xml.push_str(&format!(
            "<Owner><ID>{}</ID><DisplayName>{}</DisplayName></Owner>",
            xml_escape(&contents.owner.id),
            xml_escape(&contents.owner.display_name)
        ));
        xml.push_str("</Contents>");
    }

    xml.push_str("</ListBucketResult>");
    xml
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
