//! Per-scheme dispatch: `data:` and `blob:` are answered locally, `http(s):`
//! goes to the network stages, everything else is a network error.

use crate::base::loadstate::LoadState;
use crate::base::neterror::NetError;
use crate::fetch::httpfetch::http_fetch;
use crate::fetch::mainfetch::FetchParams;
use crate::fetch::response::{Response, ResponseRecord};
use crate::http::dataurl::DataUrl;
use crate::http::messagebody::{self, BodyInit};
use crate::http::range::{build_content_range, ByteRange};
use http::Method;

pub(crate) async fn scheme_fetch(params: &mut FetchParams) -> Response {
    if params.controller.is_cancelled() && params.request.redirect_count == 0 {
        let error = ResponseRecord::appropriate_network_error(&params.controller, None);
        return Response::from_record(error);
    }

    let scheme = params.request.current_url().scheme().to_string();
    tracing::debug!(scheme = %scheme, url = %params.request.current_url(), "scheme fetch");
    match scheme.as_str() {
        "http" | "https" => http_fetch(params).await,
        "data" => {
            params.controller.set_load_state(LoadState::ResolvingScheme);
            data_fetch(params)
        }
        "blob" => {
            params.controller.set_load_state(LoadState::ResolvingScheme);
            blob_fetch(params)
        }
        // about:blank and friends have no meaning outside a browsing context.
        _ => params.network_error(NetError::UnknownUrlScheme(scheme)),
    }
}

fn data_fetch(params: &mut FetchParams) -> Response {
    let data = match DataUrl::process(params.request.current_url()) {
        Ok(data) => data,
        Err(e) => return params.network_error(e),
    };
    let mut record = ResponseRecord::new(200, "OK");
    record.timing = params.controller.timing().clone();
    record.headers.append("content-type", &data.mime_type.to_string());
    record.body = Some(messagebody::MessageBody::from_bytes(data.body));
    Response::from_record(record)
}

fn blob_fetch(params: &mut FetchParams) -> Response {
    let request = &params.request;
    let url = request.current_url();
    if url.query().is_some() {
        let error = NetError::InvalidBlobRequest("blob URL must not carry a query");
        return params.network_error(error);
    }
    if request.method != Method::GET {
        return params.network_error(NetError::InvalidBlobRequest("blob URL only supports GET"));
    }
    let Some(blob) = params.context.blobs.resolve(url) else {
        return params.network_error(NetError::BlobNotFound);
    };

    let full_length = blob.size();
    let content_type = blob.content_type().to_string();
    let mut record = ResponseRecord::new(200, "OK");
    record.timing = params.controller.timing().clone();

    let Some(range_header) = request.headers.get("range") else {
        let body = match messagebody::extract(BodyInit::Blob(blob), false) {
            Ok((body, _)) => body,
            Err(e) => return params.network_error(e),
        };
        record.body = Some(body);
        record.headers.set("content-length", &full_length.to_string());
        record.headers.set("content-type", &content_type);
        return Response::from_record(record);
    };

    record.range_requested = true;
    let range = ByteRange::parse(range_header, true).and_then(|r| r.resolve(full_length));
    let Some((first, last)) = range else {
        tracing::debug!(range = %range_header, full_length, "unsatisfiable blob range");
        return params.network_error(NetError::RequestRangeNotSatisfiable);
    };

    let sliced = blob.slice(first, last + 1, &content_type);
    let sliced_length = sliced.size();
    let body = match messagebody::extract(BodyInit::Blob(sliced), false) {
        Ok((body, _)) => body,
        Err(e) => return params.network_error(e),
    };
    record.status = 206;
    record.status_text = "Partial Content".to_string();
    record.body = Some(body);
    record.headers.set("content-length", &sliced_length.to_string());
    record.headers.set("content-type", &content_type);
    record.headers.set("content-range", &build_content_range(first, last, full_length));
    Response::from_record(record)
}
