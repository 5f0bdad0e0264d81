use std::io::Read;
use std::path::Path;

use aozora2epub::{
    ArchiveValidator, Assembler, BookRequest, Config, EpubWriter, Fetch, FetchError, FetchedPage,
    PipelineError, Stage, StructuralCheck, PLACEHOLDER_CONTENT,
};
use zip::ZipArchive;

struct ShiftJisPage {
    html: String,
}

impl Fetch for ShiftJisPage {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let (bytes, _, _) = encoding_rs::SHIFT_JIS.encode(&self.html);
        Ok(FetchedPage {
            url: url::Url::parse(url).unwrap(),
            bytes: bytes.into_owned(),
            // The HTTP default, as sent for pages without a charset parameter.
            declared_encoding: Some("ISO-8859-1".to_string()),
        })
    }
}

struct Unreachable;

impl Fetch for Unreachable {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        Err(FetchError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

const WORK_PAGE: &str = r#"<?xml version="1.0" encoding="Shift_JIS"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/xhtml11.dtd">
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="ja">
<head>
<meta http-equiv="Content-Type" content="text/html;charset=Shift_JIS" />
<meta name="DC.Title" content="淡島寒月氏" />
<meta name="DC.Creator" content="幸田露伴" />
<title>幸田露伴 淡島寒月氏</title>
</head>
<body>
<h1 class="title">淡島寒月氏</h1>
<div class="main_text"><br />
<div class="jisage_1" style="margin-left: 1em">　<ruby><rb>露伴</rb><rp>(</rp><rt>ろはん</rt><rp>)</rp></ruby>を読む<img src="../../../gaiji/1-90/1-90-61.png" alt="※(「火＋畏」、第3水準1-87-57)" class="gaiji" />。</div>
寒月氏の<em class="sesame_dot">話</em>。<br />
</div>
<div class="bibliographical_information">底本：「露伴全集」</div>
</body>
</html>"#;

fn request(title: &str) -> BookRequest {
    BookRequest {
        url: "https://www.aozora.gr.jp/cards/000051/files/47086_27953.html".to_string(),
        title: title.to_string(),
        author: "幸田露伴".to_string(),
        card_id: "000051".to_string(),
        file_id: "47086_27953".to_string(),
        description: "A great novel".to_string(),
    }
}

fn read_entry(path: &Path, name: &str) -> String {
    let mut archive = ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut text = String::new();
    entry.read_to_string(&mut text).unwrap();
    text
}

#[tokio::test]
async fn converts_work_page_to_valid_epub() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ShiftJisPage {
        html: WORK_PAGE.to_string(),
    };

    let path = Assembler::new(Config::new(dir.path()), request("淡島寒月氏"))
        .run(&fetcher, &EpubWriter::new(), None)
        .await
        .unwrap();

    assert_eq!(path, dir.path().join("淡島寒月氏.epub"));

    let report = StructuralCheck::new().validate(&path).unwrap();
    assert!(report.valid, "{:?}", report.messages);

    let chapter = read_entry(&path, "OEBPS/chapter_1.xhtml");
    assert!(chapter.contains("<h3>淡島寒月氏</h3>"));
    assert!(chapter.contains("<div>　露伴を読む。</div>"));
    assert!(chapter.contains(r#"<em class="sesame_dot">話</em>"#));
    assert!(!chapter.contains("gaiji"));
    assert!(!chapter.contains("底本"));

    let opf = read_entry(&path, "OEBPS/content.opf");
    assert!(opf.contains("<dc:creator>幸田露伴</dc:creator>"));
    assert!(opf.contains("<dc:description>A great novel</dc:description>"));
    let nav = opf.find(r#"<itemref idref="nav"/>"#).unwrap();
    let first = opf.find(r#"<itemref idref="chapter_1"/>"#).unwrap();
    assert!(nav < first);

    let ncx = read_entry(&path, "OEBPS/toc.ncx");
    assert!(ncx.contains(r#"<content src="chapter_1.xhtml"/>"#));
}

#[tokio::test]
async fn page_without_main_text_still_packages() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = ShiftJisPage {
        html: "<html><body><p>目次のみ</p></body></html>".to_string(),
    };

    let path = Assembler::new(Config::new(dir.path()), request("A/B: Test"))
        .run(&fetcher, &EpubWriter::new(), None)
        .await
        .unwrap();

    assert_eq!(path, dir.path().join("AB_Test.epub"));
    let chapter = read_entry(&path, "OEBPS/chapter_1.xhtml");
    assert!(chapter.contains(PLACEHOLDER_CONTENT));

    let report = StructuralCheck::new().validate(&path).unwrap();
    assert!(report.valid, "{:?}", report.messages);
}

#[tokio::test]
async fn fetch_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let err = Assembler::new(Config::new(dir.path()), request("淡島寒月氏"))
        .run(&Unreachable, &EpubWriter::new(), None)
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Stage::Content);
    assert!(matches!(err, PipelineError::Fetch(FetchError::Status { status: 404, .. })));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
