//! SOAP protocol adapter.
//!
//! The teacher depends on `quick-xml` without ever using it; this is the
//! module that finally exercises that dependency. The request side is a
//! plain HTTP POST of a templated envelope (reusing `rest::HttpClient`);
//! the response side scans for a `Fault` element with `quick_xml::Reader`
//! the same streaming way `quick-xml`'s own examples do, rather than
//! parsing the whole envelope into a DOM.

use std::time::Instant;

use crate::error::ThrongarError;
use crate::model::SoapStep;
use crate::protocol::rest::HttpClient;
use crate::response::AdapterResponse;
use crate::template::{substitute, TemplateContext};
use quick_xml::events::Event;
use quick_xml::Reader;

pub async fn execute(
    step: &SoapStep,
    ctx: &TemplateContext<'_>,
    client: &HttpClient,
) -> Result<AdapterResponse, ThrongarError> {
    let url = substitute(&step.url, ctx)?;
    let envelope = substitute(&step.envelope, ctx)?;

    let mut builder = client
        .inner()
        .post(&url)
        .header("Content-Type", "text/xml; charset=utf-8");

    if let Some(action) = &step.soap_action {
        builder = builder.header("SOAPAction", substitute(action, ctx)?);
    }
    for (key, value) in &step.headers {
        builder = builder.header(key, substitute(value, ctx)?);
    }

    let start = Instant::now();
    let response = builder.body(envelope).send().await.map_err(ThrongarError::Http)?;
    let elapsed_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_lowercase(), v.to_owned())))
        .collect();

    let body_bytes = response.bytes().await.map_err(ThrongarError::Http)?;
    let size_bytes = body_bytes.len() as u64;
    let body = String::from_utf8_lossy(&body_bytes).into_owned();

    if let Some(fault) = find_soap_fault(&body) {
        return Err(ThrongarError::ProtocolError(format!("soap_fault: {fault}")));
    }

    Ok(AdapterResponse {
        status: Some(status),
        headers,
        body: Some(body),
        elapsed_ms,
        size_bytes,
    })
}

/// Scan a SOAP response for `<*:Fault>`/`<Fault>` and return the
/// `faultstring`/`Reason` text if present.
fn find_soap_fault(body: &str) -> Option<String> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut in_fault_text = false;
    let mut fault_text = String::new();
    let mut saw_fault = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(e.name().as_ref());
                if name.eq_ignore_ascii_case("fault") {
                    saw_fault = true;
                }
                if saw_fault && (name.eq_ignore_ascii_case("faultstring") || name.eq_ignore_ascii_case("text")) {
                    in_fault_text = true;
                }
            }
            Ok(Event::Text(t)) if in_fault_text => {
                fault_text.push_str(&t.unescape().unwrap_or_default());
            }
            Ok(Event::End(e)) => {
                let name = local_name(e.name().as_ref());
                if name.eq_ignore_ascii_case("faultstring") || name.eq_ignore_ascii_case("text") {
                    in_fault_text = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }

    if saw_fault {
        Some(if fault_text.is_empty() { "unknown SOAP fault".to_string() } else { fault_text })
    } else {
        None
    }
}

fn local_name(qualified: &[u8]) -> String {
    let s = String::from_utf8_lossy(qualified);
    s.rsplit(':').next().unwrap_or(&s).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_soap_fault_with_faultstring() {
        let body = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
            <soap:Body><soap:Fault><faultcode>Server</faultcode><faultstring>bad request</faultstring></soap:Fault></soap:Body>
        </soap:Envelope>"#;
        assert_eq!(find_soap_fault(body), Some("bad request".to_string()));
    }

    #[test]
    fn no_fault_in_ordinary_response() {
        let body = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
            <soap:Body><GetPriceResponse><Price>42</Price></GetPriceResponse></soap:Body>
        </soap:Envelope>"#;
        assert_eq!(find_soap_fault(body), None);
    }

    #[test]
    fn soap12_fault_reason_text() {
        let body = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope">
            <env:Body><env:Fault><env:Reason><env:Text>oops</env:Text></env:Reason></env:Fault></env:Body>
        </env:Envelope>"#;
        assert_eq!(find_soap_fault(body), Some("oops".to_string()));
    }
}
