use crate::codec::parse_time_expression;
use crate::error::{Result, VastError};
use crate::models::*;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::str::from_utf8;

/// Parse a VAST XML string into a VastDocument.
///
/// A document without a `version` attribute defaults to "4.0". A document
/// with zero Ad elements parses successfully; "no ads" is the caller's
/// decision, not a parse failure.
pub fn parse_document(xml: &str) -> Result<VastDocument> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"VAST" => {
                let mut doc = VastDocument::empty();
                if let Some(version) = attr_value(e, b"version") {
                    doc.version = version;
                }
                parse_vast_children(&mut reader, &mut doc)?;
                return Ok(doc);
            }
            Ok(Event::Empty(ref e)) if e.name().as_ref() == b"VAST" => {
                let mut doc = VastDocument::empty();
                if let Some(version) = attr_value(e, b"version") {
                    doc.version = version;
                }
                return Ok(doc);
            }
            Ok(Event::Eof) => {
                return Err(VastError::Schema("missing VAST root element".to_string()))
            }
            Err(e) => return Err(e.into()),
            _ => (),
        }
        buf.clear();
    }
}

/// Parse Ad and document-level Error elements under the VAST root
fn parse_vast_children(reader: &mut Reader<&[u8]>, doc: &mut VastDocument) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Ad" => {
                    let ad = parse_ad(reader, e)?;
                    doc.ads.push(ad);
                }
                b"Error" => {
                    doc.error_urls.push(read_text_element(reader)?);
                }
                name => {
                    let name = name.to_vec();
                    skip_element(reader, &name)?;
                }
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"VAST" => break,
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

/// Parse a single Ad element. An Ad with neither an InLine nor a Wrapper
/// child comes out as Inline with empty creatives.
fn parse_ad(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Ad> {
    let mut ad = Ad {
        id: attr_value(start, b"id"),
        sequence: attr_value(start, b"sequence").and_then(|v| v.parse().ok()),
        impressions: Vec::new(),
        error_urls: Vec::new(),
        creatives: Vec::new(),
        kind: AdKind::Inline,
    };

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"InLine" => {
                    ad.kind = AdKind::Inline;
                    parse_ad_body(reader, b"InLine", &mut ad)?;
                }
                b"Wrapper" => {
                    let mut link = WrapperLink::new(String::new());
                    if let Some(v) = attr_value(e, b"followAdditionalWrappers") {
                        link.follow_additional_wrappers = v.to_lowercase() != "false";
                    }
                    if let Some(v) = attr_value(e, b"allowMultipleAds") {
                        link.allow_multiple_ads = v.to_lowercase() == "true";
                    }
                    if let Some(v) = attr_value(e, b"fallbackOnNoAd") {
                        link.fallback_on_no_ad = v.to_lowercase() == "true";
                    }
                    if let Some(uri) = parse_ad_body(reader, b"Wrapper", &mut ad)? {
                        link.tag_uri = uri;
                    }
                    ad.kind = AdKind::Wrapper(link);
                }
                name => {
                    let name = name.to_vec();
                    skip_element(reader, &name)?;
                }
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Ad" => break,
            Ok(Event::Eof) => {
                return Err(VastError::XmlParse("unexpected end of file".to_string()))
            }
            Err(e) => return Err(e.into()),
            _ => (),
        }
        buf.clear();
    }

    Ok(ad)
}

/// Parse the shared body of an InLine or Wrapper element into `ad`.
/// Returns the VASTAdTagURI when one is present (wrapper bodies only).
fn parse_ad_body(reader: &mut Reader<&[u8]>, end_tag: &[u8], ad: &mut Ad) -> Result<Option<String>> {
    let mut tag_uri = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Impression" => {
                    ad.impressions.push(read_text_element(reader)?);
                }
                b"Error" => {
                    ad.error_urls.push(read_text_element(reader)?);
                }
                b"VASTAdTagURI" => {
                    tag_uri = Some(read_text_element(reader)?);
                }
                b"Creatives" => {
                    ad.creatives = parse_creatives(reader)?;
                }
                name => {
                    let name = name.to_vec();
                    skip_element(reader, &name)?;
                }
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == end_tag => break,
            Ok(Event::Eof) => {
                return Err(VastError::XmlParse("unexpected end of file".to_string()))
            }
            Err(e) => return Err(e.into()),
            _ => (),
        }
        buf.clear();
    }

    Ok(tag_uri)
}

/// Parse a Creatives element
fn parse_creatives(reader: &mut Reader<&[u8]>) -> Result<Vec<Creative>> {
    let mut creatives = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Creative" => {
                creatives.push(parse_creative(reader, e)?);
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Creatives" => break,
            Ok(Event::Eof) => {
                return Err(VastError::XmlParse("unexpected end of file".to_string()))
            }
            Err(e) => return Err(e.into()),
            _ => (),
        }
        buf.clear();
    }

    Ok(creatives)
}

/// Parse a Creative element
fn parse_creative(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Creative> {
    let mut creative = Creative {
        id: attr_value(start, b"id"),
        sequence: attr_value(start, b"sequence").and_then(|v| v.parse().ok()),
        ad_id: attr_value(start, b"adId"),
        linear: None,
        companion_ads: None,
        non_linear_ads: None,
    };

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Linear" => {
                    creative.linear = Some(parse_linear(reader, e)?);
                }
                // Companion and non-linear payloads are modeled but inert;
                // their subtrees are skipped without detailed parsing.
                b"CompanionAds" => {
                    creative.companion_ads = Some(CompanionAds::default());
                    skip_element(reader, b"CompanionAds")?;
                }
                b"NonLinearAds" => {
                    creative.non_linear_ads = Some(NonLinearAds::default());
                    skip_element(reader, b"NonLinearAds")?;
                }
                name => {
                    let name = name.to_vec();
                    skip_element(reader, &name)?;
                }
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Creative" => break,
            Ok(Event::Eof) => {
                return Err(VastError::XmlParse("unexpected end of file".to_string()))
            }
            Err(e) => return Err(e.into()),
            _ => (),
        }
        buf.clear();
    }

    Ok(creative)
}

/// Parse a Linear element
fn parse_linear(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Linear> {
    let mut linear = Linear::new(0.0);
    if let Some(offset) = attr_value(start, b"skipoffset") {
        linear.skip_offset = Some(parse_time_expression(&offset));
    }

    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Duration" => {
                    linear.duration = parse_time_expression(&read_text_element(reader)?);
                }
                b"MediaFiles" => {
                    linear.media_files = parse_media_files(reader)?;
                }
                b"TrackingEvents" => {
                    linear.tracking_events = parse_tracking_events(reader)?;
                }
                b"VideoClicks" => {
                    linear.video_clicks = Some(parse_video_clicks(reader)?);
                }
                name => {
                    let name = name.to_vec();
                    skip_element(reader, &name)?;
                }
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Linear" => break,
            Ok(Event::Eof) => {
                return Err(VastError::XmlParse("unexpected end of file".to_string()))
            }
            Err(e) => return Err(e.into()),
            _ => (),
        }
        buf.clear();
    }

    Ok(linear)
}

/// Parse a MediaFiles element
fn parse_media_files(reader: &mut Reader<&[u8]>) -> Result<Vec<MediaFile>> {
    let mut media_files = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"MediaFile" => {
                media_files.push(parse_media_file(reader, e)?);
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"MediaFiles" => break,
            Ok(Event::Eof) => {
                return Err(VastError::XmlParse("unexpected end of file".to_string()))
            }
            Err(e) => return Err(e.into()),
            _ => (),
        }
        buf.clear();
    }

    Ok(media_files)
}

/// Parse a MediaFile element. Width and height default to 0 when absent or
/// unparseable.
fn parse_media_file(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<MediaFile> {
    let media_file = MediaFile {
        url: read_text_element(reader)?,
        mime_type: attr_value(start, b"type").unwrap_or_default(),
        delivery: attr_value(start, b"delivery"),
        width: attr_value(start, b"width")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        height: attr_value(start, b"height")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        bitrate: attr_value(start, b"bitrate").and_then(|v| v.parse().ok()),
        codec: attr_value(start, b"codec"),
    };

    Ok(media_file)
}

/// Parse a TrackingEvents element
fn parse_tracking_events(reader: &mut Reader<&[u8]>) -> Result<Vec<TrackingEvent>> {
    let mut events = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"Tracking" => {
                let event = attr_value(e, b"event")
                    .map(|v| TrackingEventType::from_name(&v))
                    .unwrap_or_else(|| TrackingEventType::Other(String::new()));
                let offset = attr_value(e, b"offset").map(|v| parse_time_expression(&v));
                events.push(TrackingEvent {
                    event,
                    url: read_text_element(reader)?,
                    offset,
                });
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"TrackingEvents" => break,
            Ok(Event::Eof) => {
                return Err(VastError::XmlParse("unexpected end of file".to_string()))
            }
            Err(e) => return Err(e.into()),
            _ => (),
        }
        buf.clear();
    }

    Ok(events)
}

/// Parse a VideoClicks element
fn parse_video_clicks(reader: &mut Reader<&[u8]>) -> Result<VideoClicks> {
    let mut clicks = VideoClicks::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"ClickThrough" => {
                    clicks.click_through = Some(read_text_element(reader)?);
                }
                b"ClickTracking" => {
                    clicks.click_tracking.push(read_text_element(reader)?);
                }
                name => {
                    let name = name.to_vec();
                    skip_element(reader, &name)?;
                }
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"VideoClicks" => break,
            Ok(Event::Eof) => {
                return Err(VastError::XmlParse("unexpected end of file".to_string()))
            }
            Err(e) => return Err(e.into()),
            _ => (),
        }
        buf.clear();
    }

    Ok(clicks)
}

/// Read the text or CDATA content of an element up to its end tag
fn read_text_element(reader: &mut Reader<&[u8]>) -> Result<String> {
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Text(e)) => {
                text = e.unescape()?.trim().to_string();
            }
            Ok(Event::CData(e)) => {
                if let Ok(value) = from_utf8(&e) {
                    text = value.trim().to_string();
                }
            }
            Ok(Event::End(_)) => break,
            Ok(Event::Eof) => {
                return Err(VastError::XmlParse("unexpected end of file".to_string()))
            }
            Err(e) => return Err(e.into()),
            _ => (),
        }
        buf.clear();
    }

    Ok(text)
}

/// Skip the remainder of an element whose Start event was already consumed
fn skip_element(reader: &mut Reader<&[u8]>, name: &[u8]) -> Result<()> {
    let mut depth = 1usize;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == name => depth += 1,
            Ok(Event::End(ref e)) if e.name().as_ref() == name => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            Ok(Event::Eof) => {
                return Err(VastError::XmlParse("unexpected end of file".to_string()))
            }
            Err(e) => return Err(e.into()),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

/// Read a string attribute from an element start tag
fn attr_value(start: &BytesStart, key: &[u8]) -> Option<String> {
    start
        .attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| from_utf8(&a.value).ok().map(|v| v.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const INLINE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<VAST version="4.0">
  <Error><![CDATA[https://err.example/doc?code=[ERRORCODE]]]></Error>
  <Ad id="a1" sequence="1">
    <InLine>
      <AdSystem>Test</AdSystem>
      <AdTitle>Sample</AdTitle>
      <Impression><![CDATA[https://imp.example/1]]></Impression>
      <Error><![CDATA[https://err.example/ad]]></Error>
      <Creatives>
        <Creative id="c1">
          <Linear skipoffset="00:00:05">
            <Duration>00:00:30</Duration>
            <TrackingEvents>
              <Tracking event="start"><![CDATA[https://t.example/start]]></Tracking>
              <Tracking event="midRollBonus"><![CDATA[https://t.example/custom]]></Tracking>
              <Tracking event="progress" offset="00:00:10"><![CDATA[https://t.example/p10]]></Tracking>
            </TrackingEvents>
            <VideoClicks>
              <ClickThrough><![CDATA[https://landing.example]]></ClickThrough>
              <ClickTracking><![CDATA[https://t.example/click]]></ClickTracking>
            </VideoClicks>
            <MediaFiles>
              <MediaFile type="video/mp4" delivery="progressive" width="1920" height="1080" bitrate="2500"><![CDATA[https://cdn.example/ad.mp4]]></MediaFile>
              <MediaFile type="video/webm" width="bogus"><![CDATA[https://cdn.example/ad.webm]]></MediaFile>
            </MediaFiles>
          </Linear>
        </Creative>
      </Creatives>
    </InLine>
  </Ad>
</VAST>"#;

    #[test]
    fn parses_inline_document() {
        let doc = parse_document(INLINE_XML).unwrap();
        assert_eq!(doc.version, "4.0");
        assert_eq!(doc.error_urls.len(), 1);
        assert_eq!(doc.ads.len(), 1);

        let ad = &doc.ads[0];
        assert_eq!(ad.id.as_deref(), Some("a1"));
        assert_eq!(ad.sequence, Some(1));
        assert_eq!(ad.impressions, vec!["https://imp.example/1"]);
        assert_eq!(ad.error_urls, vec!["https://err.example/ad"]);
        assert!(!ad.is_wrapper());

        let linear = ad.first_linear().unwrap();
        assert_eq!(linear.duration, 30.0);
        assert_eq!(linear.skip_offset, Some(5.0));
        assert_eq!(linear.media_files.len(), 2);
        assert_eq!(linear.media_files[0].bitrate, Some(2500));
        assert_eq!(linear.media_files[1].width, 0);
        assert_eq!(
            linear.video_clicks.as_ref().unwrap().click_through.as_deref(),
            Some("https://landing.example")
        );
    }

    #[test]
    fn unknown_tracking_event_preserved_verbatim() {
        let doc = parse_document(INLINE_XML).unwrap();
        let linear = doc.ads[0].first_linear().unwrap();
        assert!(linear
            .tracking_events
            .iter()
            .any(|t| t.event == TrackingEventType::Other("midRollBonus".to_string())));
    }

    #[test]
    fn progress_offset_parsed() {
        let doc = parse_document(INLINE_XML).unwrap();
        let linear = doc.ads[0].first_linear().unwrap();
        let progress = linear
            .tracking_events
            .iter()
            .find(|t| t.event == TrackingEventType::Progress)
            .unwrap();
        assert_eq!(progress.offset, Some(10.0));
    }

    #[test]
    fn parses_wrapper_attributes() {
        let xml = r#"<VAST version="3.0">
  <Ad id="w1">
    <Wrapper followAdditionalWrappers="false" allowMultipleAds="true" fallbackOnNoAd="true">
      <VASTAdTagURI><![CDATA[https://next.example/vast.xml]]></VASTAdTagURI>
      <Impression><![CDATA[https://imp.example/w]]></Impression>
    </Wrapper>
  </Ad>
</VAST>"#;
        let doc = parse_document(xml).unwrap();
        assert_eq!(doc.version, "3.0");
        let ad = &doc.ads[0];
        match &ad.kind {
            AdKind::Wrapper(link) => {
                assert_eq!(link.tag_uri, "https://next.example/vast.xml");
                assert!(!link.follow_additional_wrappers);
                assert!(link.allow_multiple_ads);
                assert!(link.fallback_on_no_ad);
            }
            AdKind::Inline => panic!("expected wrapper"),
        }
        assert_eq!(ad.impressions, vec!["https://imp.example/w"]);
    }

    #[test]
    fn version_defaults_to_4_0() {
        let doc = parse_document("<VAST><Ad></Ad></VAST>").unwrap();
        assert_eq!(doc.version, "4.0");
    }

    #[test]
    fn ad_with_neither_variant_is_inline_with_no_creatives() {
        let doc = parse_document(r#"<VAST version="4.0"><Ad id="x"></Ad></VAST>"#).unwrap();
        let ad = &doc.ads[0];
        assert_eq!(ad.kind, AdKind::Inline);
        assert!(ad.creatives.is_empty());
    }

    #[test]
    fn zero_ads_is_a_successful_parse() {
        let doc = parse_document(r#"<VAST version="4.0"></VAST>"#).unwrap();
        assert!(doc.ads.is_empty());
    }

    #[test]
    fn missing_root_is_a_schema_error() {
        let err = parse_document("<NotVast/>").unwrap_err();
        assert_eq!(err.code(), 101);
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        let err = parse_document(r#"<VAST version="4.0"><Ad><InLine></VAST"#).unwrap_err();
        assert_eq!(err.code(), 100);
    }
}
