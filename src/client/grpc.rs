//! gRPC transport.

use super::proto;
use super::{
    MetaReader, PageReader, QueryExecutor, ReadOptions, Transport, observed, require_query,
    require_source_id,
};
use crate::config::{SuiteConfig, TlsConfig};
use crate::models::{Envelope, MetaInfo, QueryResult, TimeWindow, promql_step, promql_time};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use http::uri::PathAndQuery;
use std::collections::HashMap;
use std::time::Duration;
use tonic::Code;
use tonic::codec::ProstCodec;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};

/// Store client over gRPC.
///
/// Uses mutual TLS when CA, certificate and key paths are all configured,
/// plaintext otherwise. The channel connects on first use.
#[derive(Clone)]
pub struct GrpcClient {
    channel: Channel,
    addr: String,
}

impl GrpcClient {
    /// Builds a client for `config.log_cache_addr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the address is not a valid URI or the TLS
    /// material cannot be read.
    pub fn new(config: &SuiteConfig) -> Result<Self> {
        let tls = config.tls.is_enabled().then(|| load_tls(&config.tls)).transpose()?;
        let scheme = if tls.is_some() { "https" } else { "http" };
        let uri = format!("{scheme}://{}", config.log_cache_addr);

        let mut endpoint = Endpoint::from_shared(uri).map_err(|e| Error::Config {
            operation: "parse log cache address".to_string(),
            cause: e.to_string(),
        })?;
        endpoint = endpoint
            .timeout(config.default_timeout)
            .connect_timeout(config.default_timeout);
        if let Some(tls) = tls {
            endpoint = endpoint.tls_config(tls).map_err(|e| Error::Config {
                operation: "configure grpc tls".to_string(),
                cause: e.to_string(),
            })?;
        }

        tracing::debug!(
            addr = %config.log_cache_addr,
            tls = config.tls.is_enabled(),
            "Created gRPC store client"
        );

        Ok(Self {
            channel: endpoint.connect_lazy(),
            addr: config.log_cache_addr.clone(),
        })
    }

    /// The address this client was built for.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn unary<Req, Resp>(
        &self,
        path: &'static str,
        request: Req,
    ) -> std::result::Result<Resp, tonic::Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| tonic::Status::unavailable(e.to_string()))?;
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc
            .unary(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                codec,
            )
            .await?;
        Ok(response.into_inner())
    }
}

fn load_tls(tls: &TlsConfig) -> Result<ClientTlsConfig> {
    let read = |path: Option<&std::path::Path>, what: &str| {
        let path = path.ok_or_else(|| Error::Config {
            operation: format!("read {what}"),
            cause: "path not configured".to_string(),
        })?;
        std::fs::read(path).map_err(|e| Error::Config {
            operation: format!("read {what} {}", path.display()),
            cause: e.to_string(),
        })
    };
    let ca = read(tls.ca_path.as_deref(), "CA certificate")?;
    let cert = read(tls.cert_path.as_deref(), "client certificate")?;
    let key = read(tls.key_path.as_deref(), "client key")?;

    Ok(ClientTlsConfig::new()
        .domain_name(tls.server_name.clone())
        .ca_certificate(Certificate::from_pem(ca))
        .identity(Identity::from_pem(cert, key)))
}

fn transport_error(operation: &str, status: &tonic::Status) -> Error {
    Error::transport(
        operation,
        format!("{:?}: {}", status.code(), status.message()),
    )
}

fn query_error(query: &str, status: &tonic::Status) -> Error {
    match status.code() {
        Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => Error::Query {
            query: query.to_string(),
            cause: status.message().to_string(),
        },
        _ => transport_error("query", status),
    }
}

fn envelope_type_values(options: &ReadOptions) -> Vec<i32> {
    options
        .envelope_types
        .iter()
        .map(crate::models::EnvelopeType::as_i32)
        .collect()
}

impl PageReader for GrpcClient {
    async fn read(
        &self,
        source_id: &str,
        window: TimeWindow,
        options: &ReadOptions,
    ) -> Result<Vec<Envelope>> {
        require_source_id(source_id)?;
        let request = proto::ReadRequest {
            source_id: source_id.to_string(),
            start_time: window.start_nanos(),
            end_time: window.end_nanos(),
            limit: options.limit.map_or(0, i64::from),
            envelope_types: envelope_type_values(options),
            descending: options.descending,
        };
        observed(Transport::Grpc, "read", async {
            let response: proto::ReadResponse = self
                .unary(proto::EGRESS_READ, request)
                .await
                .map_err(|status| transport_error("read", &status))?;
            Ok(response
                .envelopes
                .unwrap_or_default()
                .batch
                .into_iter()
                .map(Envelope::from)
                .collect())
        })
        .await
    }
}

impl MetaReader for GrpcClient {
    async fn meta(&self) -> Result<HashMap<String, MetaInfo>> {
        observed(Transport::Grpc, "meta", async {
            let response: proto::MetaResponse = self
                .unary(proto::EGRESS_META, proto::MetaRequest { local_only: false })
                .await
                .map_err(|status| transport_error("meta", &status))?;
            Ok(response
                .meta
                .into_iter()
                .map(|(source_id, info)| (source_id, MetaInfo::from(info)))
                .collect())
        })
        .await
    }
}

impl QueryExecutor for GrpcClient {
    async fn instant_query(&self, query: &str, time: Option<DateTime<Utc>>) -> Result<QueryResult> {
        require_query(query, None)?;
        let request = proto::InstantQueryRequest {
            query: query.to_string(),
            time: time.map(promql_time).unwrap_or_default(),
        };
        observed(Transport::Grpc, "instant_query", async {
            let response: proto::InstantQueryResult = self
                .unary(proto::PROMQL_INSTANT, request)
                .await
                .map_err(|status| query_error(query, &status))?;
            response.into_result()
        })
        .await
    }

    async fn range_query(
        &self,
        query: &str,
        window: TimeWindow,
        step: Duration,
    ) -> Result<QueryResult> {
        require_query(query, Some(step))?;
        let request = proto::RangeQueryRequest {
            query: query.to_string(),
            start: promql_time(window.start()),
            end: promql_time(window.end()),
            step: promql_step(step),
        };
        observed(Transport::Grpc, "range_query", async {
            let response: proto::RangeQueryResult = self
                .unary(proto::PROMQL_RANGE, request)
                .await
                .map_err(|status| query_error(query, &status))?;
            response.into_result()
        })
        .await
    }
}
