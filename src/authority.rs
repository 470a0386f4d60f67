//! Hickory DNS authority serving the container snapshot.

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::rdata::{A, AAAA, SOA, SRV};
use hickory_proto::rr::{DNSClass, LowerName, Name, RData, Record, RecordSet, RecordType};
use hickory_server::authority::{
    Authority, LookupControlFlow, LookupError, LookupOptions, LookupRecords, MessageRequest,
    UpdateResult, ZoneType,
};
use hickory_server::server::RequestInfo;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::{normalize_zone, DnsConfig};
use crate::metrics::{self, QueryResult, Timer};
use crate::records::SrvTarget;
use crate::resolver::{self, Resolution, SRV_PRIORITY, SRV_WEIGHT};
use crate::state::DnsState;

/// Authority for the container zone.
///
/// Names the snapshot does not know are skipped so the next authority
/// registered for the zone can answer them.
pub struct DockerAuthority {
    origin: LowerName,
    zone: String,
    state: DnsState,
    config: Arc<DnsConfig>,
}

impl DockerAuthority {
    /// Create a new authority for the given configuration and state.
    pub fn new(config: DnsConfig, state: DnsState) -> Result<Self, hickory_proto::ProtoError> {
        let origin = Name::from_ascii(&config.zone)?.into();
        let zone = normalize_zone(&config.zone).unwrap_or_else(|| config.zone.clone());

        Ok(Self {
            origin,
            zone,
            state,
            config: Arc::new(config),
        })
    }

    /// Build A or AAAA records for the given name and addresses.
    fn build_address_records(&self, name: Name, rtype: RecordType, ips: &[IpAddr]) -> RecordSet {
        let mut record_set = RecordSet::new(name.clone(), rtype, 0);

        for ip in ips {
            let rdata = match ip {
                IpAddr::V4(v4) => RData::A(A::from(*v4)),
                IpAddr::V6(v6) => RData::AAAA(AAAA::from(*v6)),
            };
            let mut record = Record::from_rdata(name.clone(), self.config.ttl, rdata);
            record.set_dns_class(DNSClass::IN);
            record_set.insert(record, 0);
        }

        record_set
    }

    /// Build SRV records for the given name and targets.
    fn build_srv_records(&self, name: Name, targets: &[SrvTarget]) -> RecordSet {
        let mut record_set = RecordSet::new(name.clone(), RecordType::SRV, 0);

        for target in targets {
            let target_name = match Name::from_ascii(&target.target) {
                Ok(target_name) => target_name,
                Err(e) => {
                    debug!(target = %target.target, error = %e, "skipping SRV target with invalid name");
                    continue;
                }
            };
            let srv = SRV::new(SRV_PRIORITY, SRV_WEIGHT, target.port, target_name);
            let mut record = Record::from_rdata(name.clone(), self.config.ttl, RData::SRV(srv));
            record.set_dns_class(DNSClass::IN);
            record_set.insert(record, 0);
        }

        record_set
    }

    /// Build the SOA record for this zone.
    fn build_soa_record(&self) -> RecordSet {
        let soa = SOA::new(
            Name::from_ascii(&self.config.soa.mname).unwrap_or_else(|_| Name::root()),
            Name::from_ascii(&self.config.soa.rname).unwrap_or_else(|_| Name::root()),
            self.state.serial(),
            self.config.soa.refresh as i32,
            self.config.soa.retry as i32,
            self.config.soa.expire as i32,
            self.config.soa.minimum,
        );

        let name = Name::from(self.origin.clone());
        let mut record_set = RecordSet::new(name.clone(), RecordType::SOA, 0);
        let mut record = Record::from_rdata(name, self.config.ttl, RData::SOA(soa));
        record.set_dns_class(DNSClass::IN);
        record_set.insert(record, 0);

        record_set
    }
}

#[async_trait]
impl Authority for DockerAuthority {
    type Lookup = LookupRecords;

    fn zone_type(&self) -> ZoneType {
        ZoneType::Primary
    }

    fn is_axfr_allowed(&self) -> bool {
        false
    }

    fn origin(&self) -> &LowerName {
        &self.origin
    }

    async fn lookup(
        &self,
        name: &LowerName,
        rtype: RecordType,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        let timer = Timer::start();
        let rtype_str = rtype.to_string();

        if rtype == RecordType::SOA && *name == self.origin {
            debug!(name = %name, "SOA lookup");
            metrics::record_query(&rtype_str, QueryResult::Answered, timer.elapsed());
            let record_set = Arc::new(self.build_soa_record());
            return LookupControlFlow::Break(Ok(LookupRecords::new(lookup_options, record_set)));
        }

        let name_str = name.to_string();
        let snapshot = self.state.snapshot();

        trace!(name = %name_str, rtype = ?rtype, generation = snapshot.generation(), "DNS lookup");

        match resolver::resolve(&snapshot, &self.zone, &name_str, rtype) {
            Resolution::Defer => {
                trace!(name = %name_str, rtype = ?rtype, "deferring to next authority");
                metrics::record_query(&rtype_str, QueryResult::Deferred, timer.elapsed());
                LookupControlFlow::Skip
            }
            Resolution::NoData => {
                debug!(name = %name_str, rtype = ?rtype, "name exists without records of this type");
                metrics::record_query(&rtype_str, QueryResult::NoData, timer.elapsed());
                LookupControlFlow::Break(Err(LookupError::NameExists))
            }
            Resolution::Addresses(ips) => {
                debug!(name = %name_str, rtype = ?rtype, count = ips.len(), "returning address records");
                metrics::record_answers_returned(ips.len());
                metrics::record_query(&rtype_str, QueryResult::Answered, timer.elapsed());
                let record_set =
                    Arc::new(self.build_address_records(Name::from(name.clone()), rtype, &ips));
                LookupControlFlow::Break(Ok(LookupRecords::new(lookup_options, record_set)))
            }
            Resolution::Services(targets) => {
                debug!(name = %name_str, count = targets.len(), "returning SRV records");
                metrics::record_answers_returned(targets.len());
                metrics::record_query(&rtype_str, QueryResult::Answered, timer.elapsed());
                let record_set = Arc::new(self.build_srv_records(Name::from(name.clone()), &targets));
                LookupControlFlow::Break(Ok(LookupRecords::new(lookup_options, record_set)))
            }
        }
    }

    async fn search(
        &self,
        request_info: RequestInfo<'_>,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        self.lookup(
            request_info.query.name(),
            request_info.query.query_type(),
            lookup_options,
        )
        .await
    }

    async fn get_nsec_records(
        &self,
        _name: &LowerName,
        _lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        // DNSSEC not supported
        LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError)))
    }

    async fn update(&self, _update: &MessageRequest) -> UpdateResult<bool> {
        // Dynamic updates not supported
        Err(ResponseCode::NotImp)
    }
}
