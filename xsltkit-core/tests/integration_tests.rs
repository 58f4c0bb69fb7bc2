/// Integration tests for xsltkit-core
///
/// These tests drive the runtime the way a caller would:
/// 1. Sync and async parsing of XML, HTML and stylesheets
/// 2. Transforms with parameters, sync and async
/// 3. Callback delivery, fatal callback errors and handle lifetimes

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::PathBuf;
use std::rc::Rc;

use xsltkit_core::{
    DocumentKind, Error, ErrorKind, FatalError, OperationKind, ResourceKind, Runtime,
    StylesheetKind, Value,
};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn fixture(name: &str) -> Value {
    Value::from(fixtures_dir().join(name).to_string_lossy().into_owned())
}

type Outcome = Rc<RefCell<Vec<(Option<Error>, Option<Value>)>>>;

/// Callback that records every invocation
fn recorder() -> (Outcome, Value) {
    let outcome: Outcome = Rc::new(RefCell::new(Vec::new()));
    let sink = outcome.clone();
    let callback = Value::callback(move |_, error, result| {
        sink.borrow_mut().push((error, result));
        Ok(())
    });
    (outcome, callback)
}

/// Run one async call to completion and return its single outcome
fn call_async(runtime: &mut Runtime, kind: OperationKind, args: &[Value]) -> (Option<Error>, Option<Value>) {
    let (outcome, callback) = recorder();
    let mut args = args.to_vec();
    args.push(callback);
    let returned = runtime.call(kind, &args).expect("submission should succeed");
    assert!(returned.is_undefined());
    runtime.run_until_idle().expect("callback should not fail");

    let mut calls = outcome.borrow_mut();
    assert_eq!(calls.len(), 1, "callback must run exactly once");
    calls.remove(0)
}

fn sync_stylesheet(runtime: &mut Runtime, name: &str) -> Value {
    runtime
        .call(OperationKind::ReadXsltFile, &[fixture(name)])
        .expect("stylesheet should parse")
}

fn sync_document(runtime: &mut Runtime) -> Value {
    runtime
        .call(OperationKind::ReadXmlFile, &[fixture("file.xml")])
        .expect("document should parse")
}

// ============================================================================
// Parsing
// ============================================================================

#[test]
fn test_sync_parse_operations() {
    let mut runtime = Runtime::new();

    let xml = runtime
        .call(OperationKind::ReadXmlString, &[Value::from("<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><catalog/>")])
        .unwrap();
    assert_eq!(xml.as_document().unwrap().root_name().as_deref(), Some("catalog"));

    let html = runtime
        .call(OperationKind::ReadHtmlString, &[Value::from("<p>unclosed<br>text")])
        .unwrap();
    assert!(html.as_document().unwrap().root_name().is_some());

    let sheet = runtime
        .call_by_name("readXsltString", &[Value::from(std::fs::read_to_string(fixtures_dir().join("stylesheet.xslt")).unwrap())])
        .unwrap();
    assert_eq!(sheet.as_stylesheet().unwrap().template_count(), 1);

    let file = sync_document(&mut runtime);
    assert_eq!(file.as_document().unwrap().root_name().as_deref(), Some("catalog"));
}

#[test]
fn test_sync_parse_errors() {
    let mut runtime = Runtime::new();

    let err = runtime
        .call(OperationKind::ReadXmlString, &[Value::from("<catalog>")])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert!(err.to_string().contains("Failed to parse XML"));

    let err = runtime
        .call(OperationKind::ReadXsltFile, &[fixture("invalid.xslt")])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Compile);
    assert!(err.to_string().contains("Failed to parse XSLT"));

    let err = runtime.call(OperationKind::ReadXmlFile, &[]).unwrap_err();
    assert_eq!(err.to_string(), "Expected 1 arguments, got 0");
}

#[test]
fn test_async_read_xml_file() {
    let mut runtime = Runtime::new();
    let (error, xml) = call_async(&mut runtime, OperationKind::ReadXmlFile, &[fixture("file.xml")]);
    assert!(error.is_none());
    assert!(xml.unwrap().as_document().is_some());
}

#[test]
fn test_async_read_missing_xml_file() {
    let mut runtime = Runtime::new();
    let (error, xml) = call_async(&mut runtime, OperationKind::ReadXmlFile, &[fixture("missing-file.xml")]);
    assert!(error.unwrap().to_string().contains("Failed to parse XML"));
    assert!(xml.is_none());
}

#[test]
fn test_async_read_html_file() {
    let mut runtime = Runtime::new();
    let (error, html) = call_async(&mut runtime, OperationKind::ReadHtmlFile, &[fixture("file.html")]);
    assert!(error.is_none(), "{:?}", error);
    let html = html.unwrap();
    let document = html.as_document().unwrap();
    assert_eq!(document.root_name().as_deref(), Some("html"));
    let xml = document.to_xml_string().unwrap();
    assert!(xml.contains("Bob Dylan"));
    assert!(xml.contains("VAT &amp; shipping"));
}

#[test]
fn test_async_read_missing_html_file() {
    let mut runtime = Runtime::new();
    let (error, html) = call_async(&mut runtime, OperationKind::ReadHtmlFile, &[fixture("missing-file.html")]);
    assert!(error.unwrap().to_string().contains("Failed to parse HTML"));
    assert!(html.is_none());
}

#[test]
fn test_async_read_xslt_file() {
    let mut runtime = Runtime::new();
    let (error, sheet) = call_async(&mut runtime, OperationKind::ReadXsltFile, &[fixture("stylesheet.xslt")]);
    assert!(error.is_none());
    assert!(sheet.unwrap().as_stylesheet().is_some());
}

#[test]
fn test_async_read_missing_xslt_file() {
    let mut runtime = Runtime::new();
    let (error, sheet) = call_async(&mut runtime, OperationKind::ReadXsltFile, &[fixture("missing-file.xslt")]);
    assert!(error.unwrap().to_string().contains("Failed to parse XML"));
    assert!(sheet.is_none());
}

#[test]
fn test_async_read_invalid_xslt_file() {
    let mut runtime = Runtime::new();
    let (error, sheet) = call_async(&mut runtime, OperationKind::ReadXsltFile, &[fixture("invalid.xslt")]);
    assert!(error.unwrap().to_string().contains("Failed to parse XSLT"));
    assert!(sheet.is_none());
}

#[test]
fn test_read_file_written_at_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("written.xml");
    std::fs::write(&path, "<written><ok/></written>").unwrap();

    let mut runtime = Runtime::new();
    let (error, xml) = call_async(
        &mut runtime,
        OperationKind::ReadXmlFile,
        &[Value::from(path.to_string_lossy().into_owned())],
    );
    assert!(error.is_none());
    assert_eq!(xml.unwrap().as_document().unwrap().root_name().as_deref(), Some("written"));
}

// ============================================================================
// Transform
// ============================================================================

#[test]
fn test_sync_transform() {
    let mut runtime = Runtime::new();
    let sheet = sync_stylesheet(&mut runtime, "stylesheet.xslt");
    let doc = sync_document(&mut runtime);

    let result = runtime
        .call(OperationKind::Transform, &[sheet, doc, Value::Array(vec![])])
        .unwrap()
        .into_string()
        .unwrap();
    assert!(result.contains("<td>Bob Dylan</td>"), "{}", result);
    assert!(result.contains("<td>Hide your heart</td>"));
    assert!(result.contains("<h2>My CD Collection</h2>"));
}

#[test]
fn test_async_transform() {
    let mut runtime = Runtime::new();
    let sheet = sync_stylesheet(&mut runtime, "stylesheet.xslt");
    let doc = sync_document(&mut runtime);

    let (error, result) = call_async(&mut runtime, OperationKind::Transform, &[sheet, doc, Value::Array(vec![])]);
    assert!(error.is_none());
    assert!(result.unwrap().as_str().unwrap().contains("<td>Bob Dylan</td>"));
}

#[test]
fn test_transform_parameters() {
    let mut runtime = Runtime::new();
    let sheet = sync_stylesheet(&mut runtime, "params.xslt");
    let doc = sync_document(&mut runtime);

    let defaults = runtime
        .call(OperationKind::Transform, &[sheet.clone(), doc.clone(), Value::Array(vec![])])
        .unwrap();
    assert_eq!(defaults.as_str(), Some("nobody: "));

    let params = Value::Array(vec![Value::from("artist"), Value::from("'Bob Dylan'")]);
    let (error, result) = call_async(&mut runtime, OperationKind::Transform, &[sheet, doc, params]);
    assert!(error.is_none(), "{:?}", error);
    assert_eq!(result.unwrap().as_str(), Some("Bob Dylan: Empire Burlesque"));
}

#[test]
fn test_transform_odd_parameters_fail_before_submission() {
    let mut runtime = Runtime::new();
    let sheet = sync_stylesheet(&mut runtime, "stylesheet.xslt");
    let doc = sync_document(&mut runtime);
    let (outcome, callback) = recorder();

    let err = runtime
        .call(
            OperationKind::Transform,
            &[sheet.clone(), doc.clone(), Value::Array(vec![Value::from("k")]), callback],
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Argument);
    assert_eq!(err.to_string(), "Array contains an odd number of parameters");
    assert_eq!(runtime.pending_count(), 0);
    runtime.run_until_idle().unwrap();
    assert!(outcome.borrow().is_empty());

    let err = runtime
        .call(OperationKind::Transform, &[sheet, doc, Value::from("k")])
        .unwrap_err();
    assert_eq!(err.to_string(), "Third parameter must be an array");
}

#[test]
fn test_trailing_non_callable_selects_sync() {
    let mut runtime = Runtime::new();
    let sheet = sync_stylesheet(&mut runtime, "stylesheet.xslt");
    let doc = sync_document(&mut runtime);

    let result = runtime
        .call(
            OperationKind::Transform,
            &[sheet, doc, Value::Array(vec![]), Value::from("not a callback")],
        )
        .unwrap();
    assert!(result.as_str().unwrap().contains("Bob Dylan"));
    assert!(runtime.is_idle());
}

// ============================================================================
// Dispatch and lifetimes
// ============================================================================

#[test]
fn test_many_concurrent_transforms_each_call_back_once() {
    let mut runtime = Runtime::new();
    let sheet = sync_stylesheet(&mut runtime, "stylesheet.xslt");
    let doc = sync_document(&mut runtime);
    let (outcome, callback) = recorder();

    for _ in 0..16 {
        runtime
            .call(
                OperationKind::Transform,
                &[sheet.clone(), doc.clone(), Value::Array(vec![]), callback.clone()],
            )
            .unwrap();
    }
    assert!(runtime.pending_count() <= 16);
    runtime.run_until_idle().unwrap();

    let calls = outcome.borrow();
    assert_eq!(calls.len(), 16);
    for (error, result) in calls.iter() {
        assert!(error.is_none());
        assert!(result.as_ref().unwrap().as_str().unwrap().contains("Bob Dylan"));
    }
}

#[test]
fn test_identity_transform_round_trips() {
    let mut runtime = Runtime::new();
    let identity = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
        <xsl:template match="@*|node()"><xsl:copy><xsl:apply-templates select="@*|node()"/></xsl:copy></xsl:template>
    </xsl:stylesheet>"#;
    let sheet = runtime
        .call(OperationKind::ReadXsltString, &[Value::from(identity)])
        .unwrap();

    for source in ["<a><b/></a>", r#"<a x="1"><b>text</b><!--note--><?pi data?></a>"#] {
        let doc = runtime
            .call(OperationKind::ReadXmlString, &[Value::from(source)])
            .unwrap();
        let output = runtime
            .call(OperationKind::Transform, &[sheet.clone(), doc.clone(), Value::Array(vec![])])
            .unwrap()
            .into_string()
            .unwrap();
        assert!(output.contains(source), "{}", output);

        let reparsed = runtime
            .call(OperationKind::ReadXmlString, &[Value::from(output.as_str())])
            .unwrap();
        let original = doc.as_document().unwrap().to_xml_string().unwrap();
        let copy = reparsed.as_document().unwrap().to_xml_string().unwrap();
        assert_eq!(copy.trim(), original.trim());
    }
}

#[test]
fn test_many_concurrent_file_parses_get_distinct_handles() {
    const TASKS: usize = 64;
    let mut runtime = Runtime::new();
    let (outcome, callback) = recorder();

    for _ in 0..TASKS {
        runtime
            .call(OperationKind::ReadXmlFile, &[fixture("file.xml"), callback.clone()])
            .unwrap();
    }
    runtime.run_until_idle().unwrap();
    assert!(runtime.is_idle());

    let calls = outcome.borrow();
    assert_eq!(calls.len(), TASKS, "each parse calls back exactly once");
    let mut ids = HashSet::new();
    for (error, result) in calls.iter() {
        assert!(error.is_none(), "{:?}", error);
        let document = result.as_ref().and_then(Value::as_document).unwrap();
        assert_eq!(document.root_name().as_deref(), Some("catalog"));
        assert!(ids.insert(document.id()), "handle ids must be distinct");
    }
    assert_eq!(ids.len(), TASKS);
}

#[test]
fn test_pending_transform_keeps_handles_alive() {
    let mut runtime = Runtime::new();
    let sheet = sync_stylesheet(&mut runtime, "stylesheet.xslt");
    let doc = sync_document(&mut runtime);
    let weak_sheet = sheet.as_stylesheet().unwrap().downgrade();
    let weak_doc = doc.as_document().unwrap().downgrade();
    let (outcome, callback) = recorder();

    runtime
        .call(OperationKind::Transform, &[sheet, doc, Value::Array(vec![]), callback])
        .unwrap();
    // the caller's references are gone; the task still holds its own

    runtime.run_until_idle().unwrap();
    let calls = outcome.borrow();
    assert!(calls[0].0.is_none());
    assert!(weak_sheet.is_released());
    assert!(weak_doc.is_released());
}

#[test]
fn test_result_handles_release_exactly_once() {
    let released_before = StylesheetKind::stats().released();
    let mut runtime = Runtime::new();
    let (error, sheet) = call_async(&mut runtime, OperationKind::ReadXsltFile, &[fixture("stylesheet.xslt")]);
    assert!(error.is_none());

    let sheet = sheet.unwrap().into_stylesheet().unwrap();
    let weak = sheet.downgrade();
    let copy = sheet.clone();
    drop(sheet);
    assert!(!weak.is_released());
    drop(copy);
    assert!(weak.is_released());
    assert!(StylesheetKind::stats().released() > released_before);
    assert!(DocumentKind::stats().created() >= DocumentKind::stats().released());
}

#[test]
fn test_callback_can_chain_calls() {
    let mut runtime = Runtime::new();
    let text = Rc::new(RefCell::new(None));
    let sink = text.clone();
    let doc = sync_document(&mut runtime);

    let on_sheet = Value::callback(move |runtime, error, sheet| {
        if let Some(error) = error {
            return Err(error.into());
        }
        let sink = sink.clone();
        let on_result = Value::callback(move |_, error, result| {
            *sink.borrow_mut() = Some((error, result));
            Ok(())
        });
        let sheet = sheet.unwrap_or_default();
        runtime.call(
            OperationKind::Transform,
            &[sheet, doc.clone(), Value::Array(vec![]), on_result],
        )?;
        Ok(())
    });
    runtime
        .call(OperationKind::ReadXsltFile, &[fixture("stylesheet.xslt"), on_sheet])
        .unwrap();
    runtime.run_until_idle().unwrap();

    let text = text.borrow();
    let (error, result) = text.as_ref().unwrap();
    assert!(error.is_none());
    assert!(result.as_ref().unwrap().as_str().unwrap().contains("Bob Dylan"));
}

#[test]
fn test_failing_callback_goes_to_fatal_handler() {
    let mut runtime = Runtime::new();
    let fatal = Rc::new(RefCell::new(Vec::new()));
    let sink = fatal.clone();
    runtime.set_fatal_handler(move |error: FatalError| sink.borrow_mut().push(error.to_string()));

    let failing = Value::callback(|_, _, _| anyhow::bail!("callback exploded"));
    let panicking = Value::callback(|_, _, _| panic!("callback panicked"));
    let (outcome, ok) = recorder();

    runtime.call(OperationKind::ReadXmlFile, &[fixture("file.xml"), failing]).unwrap();
    runtime.call(OperationKind::ReadXmlFile, &[fixture("file.xml"), panicking]).unwrap();
    runtime.call(OperationKind::ReadXmlFile, &[fixture("file.xml"), ok]).unwrap();
    runtime.run_until_idle().unwrap();

    assert!(runtime.is_idle());
    assert_eq!(outcome.borrow().len(), 1);
    let fatal = fatal.borrow();
    assert_eq!(fatal.len(), 2);
    assert!(fatal.iter().any(|m| m.contains("callback exploded")));
    assert!(fatal.iter().any(|m| m.contains("callback panicked")));
    assert!(fatal.iter().all(|m| m.contains("readXmlFile")));
}

#[test]
fn test_failing_callback_without_handler_is_returned() {
    let mut runtime = Runtime::new();
    let failing = Value::callback(|_, _, _| anyhow::bail!("unhandled"));
    runtime.call(OperationKind::ReadXmlFile, &[fixture("file.xml"), failing]).unwrap();

    let err = runtime.run_until_idle().unwrap_err();
    assert!(matches!(err, FatalError::Callback { operation: "readXmlFile", .. }));
    assert!(err.to_string().contains("unhandled"));
    // the task was released before the error surfaced
    assert!(runtime.is_idle());
}

#[test]
fn test_poll_does_not_block() {
    let mut runtime = Runtime::new();
    assert_eq!(runtime.poll().unwrap(), 0);

    let (outcome, callback) = recorder();
    runtime.call(OperationKind::ReadXmlFile, &[fixture("file.xml"), callback]).unwrap();
    let mut delivered = 0;
    while delivered == 0 {
        delivered = runtime.poll().unwrap();
        std::thread::yield_now();
    }
    assert_eq!(delivered, 1);
    assert_eq!(outcome.borrow().len(), 1);
}

#[test]
fn test_dropping_runtime_with_tasks_in_flight() {
    let weak = {
        let mut runtime = Runtime::new();
        let sheet = sync_stylesheet(&mut runtime, "stylesheet.xslt");
        let doc = sync_document(&mut runtime);
        let weak = doc.as_document().unwrap().downgrade();
        let (_, callback) = recorder();
        runtime
            .call(OperationKind::Transform, &[sheet, doc, Value::Array(vec![]), callback])
            .unwrap();
        weak
    };
    // the worker finishes on its own and releases the task's references
    for _ in 0..500 {
        if weak.is_released() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    assert!(weak.is_released());
}
