//! WordprocessingML parts of a minimal DOCX package.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::{DocumentError, DocumentResult};

pub(super) const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Default Extension="png" ContentType="image/png"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/><Override PartName="/word/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.styles+xml"/><Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/></Types>"#;

pub(super) const PACKAGE_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="word/document.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/></Relationships>"#;

pub(super) const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:styles xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:docDefaults><w:rPrDefault><w:rPr><w:rFonts w:ascii="Calibri" w:hAnsi="Calibri" w:eastAsia="Calibri" w:cs="Calibri"/><w:sz w:val="22"/></w:rPr></w:rPrDefault></w:docDefaults><w:style w:type="paragraph" w:default="1" w:styleId="Normal"><w:name w:val="Normal"/><w:qFormat/></w:style><w:style w:type="paragraph" w:styleId="Title"><w:name w:val="Title"/><w:basedOn w:val="Normal"/><w:next w:val="Normal"/><w:qFormat/><w:pPr><w:spacing w:after="240"/></w:pPr><w:rPr><w:sz w:val="56"/></w:rPr></w:style></w:styles>"#;

const IMAGE_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
const STYLES_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles";

#[derive(Debug, Clone, Copy)]
pub(super) struct Picture {
    pub number: usize,
    pub cx: u64,
    pub cy: u64,
}

impl Picture {
    pub fn media_name(&self) -> String {
        format!("image{}.png", self.number)
    }

    fn relationship_id(&self) -> String {
        format!("rIdImage{}", self.number)
    }
}

const WORDPROCESSING_NS: [(&str, &str); 5] = [
    (
        "xmlns:w",
        "http://schemas.openxmlformats.org/wordprocessingml/2006/main",
    ),
    (
        "xmlns:r",
        "http://schemas.openxmlformats.org/officeDocument/2006/relationships",
    ),
    (
        "xmlns:wp",
        "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing",
    ),
    (
        "xmlns:a",
        "http://schemas.openxmlformats.org/drawingml/2006/main",
    ),
    (
        "xmlns:pic",
        "http://schemas.openxmlformats.org/drawingml/2006/picture",
    ),
];
const CORE_PROPERTIES_NS: [(&str, &str); 4] = [
    (
        "xmlns:cp",
        "http://schemas.openxmlformats.org/package/2006/metadata/core-properties",
    ),
    ("xmlns:dc", "http://purl.org/dc/elements/1.1/"),
    ("xmlns:dcterms", "http://purl.org/dc/terms/"),
    ("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"),
];
const RELATIONSHIPS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const PICTURE_URI: &str = "http://schemas.openxmlformats.org/drawingml/2006/picture";

/// One XML part written event by event. Text and attribute values are
/// escaped by the writer.
struct Part {
    writer: Writer<Vec<u8>>,
}

impl Part {
    fn new() -> DocumentResult<Self> {
        let mut part = Self {
            writer: Writer::new(Vec::new()),
        };
        part.emit(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
        Ok(part)
    }

    fn emit(&mut self, event: Event<'_>) -> DocumentResult<()> {
        self.writer
            .write_event(event)
            .map_err(|err| DocumentError::Xml(err.to_string()))
    }

    fn open(&mut self, name: &str, attributes: &[(&str, &str)]) -> DocumentResult<()> {
        let start = BytesStart::new(name).with_attributes(attributes.iter().copied());
        self.emit(Event::Start(start))
    }

    fn empty(&mut self, name: &str, attributes: &[(&str, &str)]) -> DocumentResult<()> {
        let start = BytesStart::new(name).with_attributes(attributes.iter().copied());
        self.emit(Event::Empty(start))
    }

    fn close(&mut self, name: &str) -> DocumentResult<()> {
        self.emit(Event::End(BytesEnd::new(name)))
    }

    fn text_element(
        &mut self,
        name: &str,
        attributes: &[(&str, &str)],
        text: &str,
    ) -> DocumentResult<()> {
        self.open(name, attributes)?;
        self.emit(Event::Text(BytesText::new(&xml_chars(text))))?;
        self.close(name)
    }

    fn finish(self) -> Vec<u8> {
        self.writer.into_inner()
    }
}

pub(super) fn document_xml(title: &str, pictures: &[Picture]) -> DocumentResult<Vec<u8>> {
    let mut part = Part::new()?;
    part.open("w:document", &WORDPROCESSING_NS)?;
    part.open("w:body", &[])?;

    part.open("w:p", &[])?;
    part.open("w:pPr", &[])?;
    part.empty("w:pStyle", &[("w:val", "Title")])?;
    part.close("w:pPr")?;
    part.open("w:r", &[])?;
    part.text_element("w:t", &[("xml:space", "preserve")], title)?;
    part.close("w:r")?;
    part.close("w:p")?;

    for picture in pictures {
        inline_picture(&mut part, picture)?;
    }

    part.open("w:sectPr", &[])?;
    part.empty("w:pgSz", &[("w:w", "12240"), ("w:h", "15840")])?;
    part.empty(
        "w:pgMar",
        &[
            ("w:top", "1440"),
            ("w:right", "1440"),
            ("w:bottom", "1440"),
            ("w:left", "1440"),
            ("w:header", "720"),
            ("w:footer", "720"),
            ("w:gutter", "0"),
        ],
    )?;
    part.close("w:sectPr")?;
    part.close("w:body")?;
    part.close("w:document")?;
    Ok(part.finish())
}

fn inline_picture(part: &mut Part, picture: &Picture) -> DocumentResult<()> {
    let cx = picture.cx.to_string();
    let cy = picture.cy.to_string();
    let id = picture.number.to_string();
    let name = format!("Picture {}", picture.number);
    let media = picture.media_name();
    let rel = picture.relationship_id();

    part.open("w:p", &[])?;
    part.open("w:r", &[])?;
    part.open("w:drawing", &[])?;
    part.open(
        "wp:inline",
        &[("distT", "0"), ("distB", "0"), ("distL", "0"), ("distR", "0")],
    )?;
    part.empty("wp:extent", &[("cx", cx.as_str()), ("cy", cy.as_str())])?;
    part.empty("wp:docPr", &[("id", id.as_str()), ("name", name.as_str())])?;
    part.open("wp:cNvGraphicFramePr", &[])?;
    part.empty("a:graphicFrameLocks", &[("noChangeAspect", "1")])?;
    part.close("wp:cNvGraphicFramePr")?;

    part.open("a:graphic", &[])?;
    part.open("a:graphicData", &[("uri", PICTURE_URI)])?;
    part.open("pic:pic", &[])?;
    part.open("pic:nvPicPr", &[])?;
    part.empty("pic:cNvPr", &[("id", id.as_str()), ("name", media.as_str())])?;
    part.empty("pic:cNvPicPr", &[])?;
    part.close("pic:nvPicPr")?;
    part.open("pic:blipFill", &[])?;
    part.empty("a:blip", &[("r:embed", rel.as_str())])?;
    part.open("a:stretch", &[])?;
    part.empty("a:fillRect", &[])?;
    part.close("a:stretch")?;
    part.close("pic:blipFill")?;
    part.open("pic:spPr", &[])?;
    part.open("a:xfrm", &[])?;
    part.empty("a:off", &[("x", "0"), ("y", "0")])?;
    part.empty("a:ext", &[("cx", cx.as_str()), ("cy", cy.as_str())])?;
    part.close("a:xfrm")?;
    part.open("a:prstGeom", &[("prst", "rect")])?;
    part.empty("a:avLst", &[])?;
    part.close("a:prstGeom")?;
    part.close("pic:spPr")?;
    part.close("pic:pic")?;
    part.close("a:graphicData")?;
    part.close("a:graphic")?;

    part.close("wp:inline")?;
    part.close("w:drawing")?;
    part.close("w:r")?;
    part.close("w:p")
}

pub(super) fn document_rels(pictures: &[Picture]) -> DocumentResult<Vec<u8>> {
    let mut part = Part::new()?;
    part.open("Relationships", &[("xmlns", RELATIONSHIPS_NS)])?;
    part.empty(
        "Relationship",
        &[
            ("Id", "rIdStyles"),
            ("Type", STYLES_REL_TYPE),
            ("Target", "styles.xml"),
        ],
    )?;
    for picture in pictures {
        let id = picture.relationship_id();
        let target = format!("media/{}", picture.media_name());
        part.empty(
            "Relationship",
            &[("Id", id.as_str()), ("Type", IMAGE_REL_TYPE), ("Target", target.as_str())],
        )?;
    }
    part.close("Relationships")?;
    Ok(part.finish())
}

pub(super) fn core_properties(title: &str, created: &str) -> DocumentResult<Vec<u8>> {
    let mut part = Part::new()?;
    part.open("cp:coreProperties", &CORE_PROPERTIES_NS)?;
    part.text_element("dc:title", &[], title)?;
    part.text_element("dc:creator", &[], "konspecto")?;
    part.text_element(
        "dcterms:created",
        &[("xsi:type", "dcterms:W3CDTF")],
        created,
    )?;
    part.close("cp:coreProperties")?;
    Ok(part.finish())
}

/// Drops code points XML 1.0 cannot carry.
fn xml_chars(text: &str) -> String {
    text.chars()
        .filter(|&ch| {
            matches!(ch, '\t' | '\n' | '\r')
                || (ch >= ' ' && ch != '\u{FFFE}' && ch != '\u{FFFF}')
        })
        .collect()
}
