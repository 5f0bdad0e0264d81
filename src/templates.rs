//! Fixed package files: the stylesheet, navigation document and legacy NCX.

use crate::book::{Metadata, TocEntry};
use crate::sanitize::escape_xml;

pub const STYLESHEET_ID: &str = "style_nav";
pub const STYLESHEET_PATH: &str = "style/nav.css";
pub const NAV_ID: &str = "nav";
pub const NAV_FILENAME: &str = "nav.xhtml";
pub const NCX_ID: &str = "ncx";
pub const NCX_FILENAME: &str = "toc.ncx";

pub const STYLESHEET: &str = r#"@namespace h "http://www.w3.org/1999/xhtml";
body {
  display: block;
  margin: 5pt;
  page-break-before: always;
  text-align: justify;
}
h1, h2, h3, h4 {
  font-weight: bold;
  margin-bottom: 1em;
  margin-left: 0;
  margin-right: 0;
  margin-top: 1em;
}
p {
  margin-bottom: 1em;
  margin-left: 0;
  margin-right: 0;
  margin-top: 1em;
}
a {
  color: inherit;
  text-decoration: inherit;
  cursor: default;
}
a[href] {
  color: blue;
  text-decoration: none;
  cursor: pointer;
}
a[href]:hover {
  color: red;
}
.center {
  text-align: center;
}
.cover {
  height: 100%;
}
"#;

/// EPUB 3 navigation document listing every entry in order.
pub fn navigation_document(language: &str, toc: &[TocEntry]) -> String {
    let mut nav = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="{lang}" lang="{lang}">
<head>
    <title>Navigation</title>
    <link rel="stylesheet" type="text/css" href="{css}"/>
</head>
<body>
    <nav epub:type="toc" id="toc">
        <h1>Table of Contents</h1>
        <ol>
"#,
        lang = escape_xml(language),
        css = STYLESHEET_PATH,
    );

    for entry in toc {
        nav.push_str(&format!(
            "            <li><a href=\"{}\">{}</a></li>\n",
            escape_xml(&entry.target),
            escape_xml(&entry.label)
        ));
    }

    nav.push_str(
        r#"        </ol>
    </nav>
</body>
</html>
"#,
    );
    nav
}

/// Legacy NCX table of contents for EPUB 2 reading systems.
pub fn ncx_document(metadata: &Metadata, toc: &[TocEntry]) -> String {
    let mut ncx = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{uid}"/>
    <meta name="dtb:depth" content="1"/>
    <meta name="dtb:totalPageCount" content="0"/>
    <meta name="dtb:maxPageNumber" content="0"/>
  </head>
  <docTitle>
    <text>{title}</text>
  </docTitle>
  <docAuthor>
    <text>{author}</text>
  </docAuthor>
  <navMap>
"#,
        uid = escape_xml(metadata.identifier()),
        title = escape_xml(metadata.title()),
        author = escape_xml(metadata.author()),
    );

    for (index, entry) in toc.iter().enumerate() {
        let order = index + 1;
        ncx.push_str(&format!(
            r#"    <navPoint id="navpoint-{order}" playOrder="{order}">
      <navLabel>
        <text>{label}</text>
      </navLabel>
      <content src="{src}"/>
    </navPoint>
"#,
            order = order,
            label = escape_xml(&entry.label),
            src = escape_xml(&entry.target),
        ));
    }

    ncx.push_str("  </navMap>\n</ncx>\n");
    ncx
}
