//! Discover and Bootstrap-Discover.
//!
//! Discover walks the subtree under an Object, Instance or Resource path
//! and reports one link per traversed entity; the Object link carries the
//! version, Resource links of multi-resources carry their dimension.
//! Bootstrap-Discover reports Objects and Instances only, annotating
//! Instances with the Short Server ID and URI of the server account they
//! belong to, cross-referenced through the Security object.

use lwm2m_shared::message::Operation;
use lwm2m_shared::value::ResourceValue;
use lwm2m_shared::{
    DmError, Iid, Oid, PathLevel, Result, UriPath, OID_OSCORE, OID_SECURITY, OID_SERVER,
    SECURITY_RID_BOOTSTRAP_SERVER, SECURITY_RID_OSCORE, SECURITY_RID_SERVER_URI,
    SECURITY_RID_SSID, SERVER_RID_SSID,
};

use super::{DataModel, IterCtx, OpCtx, Produced};

/// One Discover link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverRecord {
    pub path: UriPath,
    /// Present only on the Object-level link.
    pub version: Option<String>,
    /// Present only on multi-resource links.
    pub dim: Option<u16>,
}

/// One Bootstrap-Discover link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapDiscoverRecord {
    pub path: UriPath,
    pub version: Option<String>,
    pub ssid: Option<u16>,
    pub uri: Option<String>,
}

impl DataModel {
    pub(crate) fn begin_discover(&mut self, path: &UriPath) -> Result<()> {
        if !path.has(PathLevel::Object) || path.has(PathLevel::ResourceInstance) {
            log::error!("discover can't target {}", path);
            return Err(self.fail(DmError::InputArg));
        }
        let Some(oid) = path.oid() else {
            return Err(self.fail(DmError::InputArg));
        };
        let located = self.locate_and_begin(oid);
        let obj_idx = self.latch(located)?;
        // Missing intermediate entities are a 4.04, not an empty listing.
        let located = self.registry.locate_within(obj_idx, path);
        let entity = self.latch(located)?;
        self.op.entity = Some(entity);

        let all_instances = !path.has(PathLevel::Instance);
        let all_resources = all_instances || !path.has(PathLevel::Resource);
        let mut iter = IterCtx::default();
        let mut count = 0usize;
        if all_instances {
            iter.level = Some(PathLevel::Object);
            count += 1;
        } else if all_resources {
            iter.level = Some(PathLevel::Instance);
        } else {
            iter.level = Some(PathLevel::Resource);
        }

        let obj = &self.registry.objects()[obj_idx];
        for (inst_idx, inst) in obj.instances().iter().enumerate() {
            if !all_instances {
                if Some(inst.iid()) != path.iid() {
                    continue;
                }
                iter.inst_idx = inst_idx;
            }
            if all_resources {
                count += 1;
            }
            for (res_idx, res) in inst.resources().iter().enumerate() {
                if !all_resources {
                    if Some(res.rid()) != path.rid() {
                        continue;
                    }
                    iter.res_idx = res_idx;
                }
                count += 1;
                if let Some(multi) = res.as_multi() {
                    count += multi.len();
                }
            }
        }

        self.op.op_count = count;
        self.op.ctx = OpCtx::Discover(iter);
        Ok(())
    }

    /// Emits the next Discover link.
    pub fn get_discover_record(&mut self) -> Result<Produced<DiscoverRecord>> {
        self.expect_op(&[Operation::Discover])?;
        if self.op.bootstrap {
            log::error!("incorrect operation");
            return Err(self.fail(DmError::Logic));
        }
        self.check_ongoing()?;
        self.check_count()?;

        let entity = self.entity()?;
        let mut iter = match &self.op.ctx {
            OpCtx::Discover(iter) => iter.clone(),
            _ => return Err(self.fail(DmError::Logic)),
        };

        let obj = self.registry.object_at(&entity);
        let record = match iter.level {
            Some(PathLevel::Object) => {
                iter.level = Some(PathLevel::Instance);
                DiscoverRecord {
                    path: UriPath::object(obj.oid()),
                    version: obj.version().map(String::from),
                    dim: None,
                }
            }
            Some(PathLevel::Instance) => {
                let inst = obj.instances().get(iter.inst_idx).ok_or(DmError::Logic)?;
                let path = UriPath::instance(obj.oid(), inst.iid());
                if inst.resources().is_empty() {
                    iter.inst_idx += 1;
                } else {
                    iter.level = Some(PathLevel::Resource);
                }
                DiscoverRecord {
                    path,
                    version: None,
                    dim: None,
                }
            }
            Some(PathLevel::Resource) => {
                let inst = obj.instances().get(iter.inst_idx).ok_or(DmError::Logic)?;
                let res = inst.resources().get(iter.res_idx).ok_or(DmError::Logic)?;
                let path = UriPath::resource(obj.oid(), inst.iid(), res.rid());
                let mut dim = None;
                match res.as_multi() {
                    Some(multi) => {
                        dim = Some(multi.len() as u16);
                        if multi.is_empty() {
                            bump_res_level(&mut iter, inst.resources().len());
                        } else {
                            iter.level = Some(PathLevel::ResourceInstance);
                        }
                    }
                    None => bump_res_level(&mut iter, inst.resources().len()),
                }
                DiscoverRecord {
                    path,
                    version: None,
                    dim,
                }
            }
            Some(PathLevel::ResourceInstance) => {
                let inst = obj.instances().get(iter.inst_idx).ok_or(DmError::Logic)?;
                let res = inst.resources().get(iter.res_idx).ok_or(DmError::Logic)?;
                let multi = res.as_multi().ok_or(DmError::Logic)?;
                let ri = multi
                    .instances()
                    .get(iter.res_inst_idx)
                    .ok_or(DmError::Logic)?;
                let path =
                    UriPath::resource_instance(obj.oid(), inst.iid(), res.rid(), ri.riid());
                iter.res_inst_idx += 1;
                if iter.res_inst_idx == multi.len() {
                    iter.res_inst_idx = 0;
                    iter.level = Some(PathLevel::Resource);
                    bump_res_level(&mut iter, inst.resources().len());
                }
                DiscoverRecord {
                    path,
                    version: None,
                    dim: None,
                }
            }
            _ => return Err(self.fail(DmError::Logic)),
        };

        self.op.ctx = OpCtx::Discover(iter);
        self.op.op_count -= 1;
        Ok(if self.op.op_count > 0 {
            Produced::More(record)
        } else {
            Produced::Last(record)
        })
    }

    pub(crate) fn begin_bootstrap_discover(&mut self, path: &UriPath) -> Result<()> {
        if path.has(PathLevel::Instance) {
            log::error!("bootstrap discover can't target an object instance");
            return Err(self.fail(DmError::InputArg));
        }
        let mut iter = IterCtx {
            level: Some(PathLevel::Object),
            ..IterCtx::default()
        };
        let mut count = 0usize;
        let mut matched = false;
        for idx in 0..self.registry.len() {
            let obj = &self.registry.objects()[idx];
            let wanted = match path.oid() {
                Some(oid) => obj.oid() == oid,
                None => true,
            };
            if !wanted {
                continue;
            }
            if path.oid().is_some() {
                iter.obj_idx = idx;
            }
            matched = true;
            count += 1 + obj.instance_count();
            self.call_operation_begin(idx).map_err(|err| self.fail(err))?;
        }
        if !matched {
            log::error!("bootstrap discover target not found: {}", path);
            return Err(self.fail(DmError::NotFound));
        }
        self.op.op_count = count;
        self.op.ctx = OpCtx::BootstrapDiscover(iter);
        Ok(())
    }

    /// Emits the next Bootstrap-Discover link.
    pub fn get_bootstrap_discover_record(&mut self) -> Result<Produced<BootstrapDiscoverRecord>> {
        self.expect_op(&[Operation::Discover])?;
        if !self.op.bootstrap {
            log::error!("incorrect operation");
            return Err(self.fail(DmError::Logic));
        }
        self.check_ongoing()?;
        self.check_count()?;

        let mut iter = match &self.op.ctx {
            OpCtx::BootstrapDiscover(iter) => iter.clone(),
            _ => return Err(self.fail(DmError::Logic)),
        };

        let obj = self
            .registry
            .objects()
            .get(iter.obj_idx)
            .ok_or(DmError::Logic)?;
        let record = if iter.level == Some(PathLevel::Object) {
            let record = BootstrapDiscoverRecord {
                path: UriPath::object(obj.oid()),
                version: obj.version().map(String::from),
                ssid: None,
                uri: None,
            };
            if obj.instance_count() > 0 {
                iter.level = Some(PathLevel::Instance);
            } else {
                iter.obj_idx += 1;
            }
            record
        } else {
            let inst = obj.instances().get(iter.inst_idx).ok_or(DmError::Logic)?;
            let (ssid, uri) = self.server_account_annotations(obj.oid(), inst.iid());
            let record = BootstrapDiscoverRecord {
                path: UriPath::instance(obj.oid(), inst.iid()),
                version: None,
                ssid,
                uri,
            };
            iter.inst_idx += 1;
            if iter.inst_idx == obj.instance_count() {
                iter.inst_idx = 0;
                iter.obj_idx += 1;
                iter.level = Some(PathLevel::Object);
            }
            record
        };

        self.op.ctx = OpCtx::BootstrapDiscover(iter);
        self.op.op_count -= 1;
        Ok(if self.op.op_count > 0 {
            Produced::More(record)
        } else {
            Produced::Last(record)
        })
    }

    /// SSID (and for Security instances the server URI) of the server
    /// account an Instance belongs to. Instances tied to the bootstrap
    /// server report neither.
    fn server_account_annotations(&self, oid: Oid, iid: Iid) -> (Option<u16>, Option<String>) {
        match oid {
            OID_SECURITY => {
                let ssid = self.security_instance_ssid(iid);
                let uri = ssid.and_then(|_| {
                    match self
                        .resource_value(&UriPath::resource(oid, iid, SECURITY_RID_SERVER_URI))
                    {
                        Ok((ResourceValue::String(chunk), _)) => {
                            chunk.as_str().map(String::from)
                        }
                        _ => None,
                    }
                });
                (ssid, uri)
            }
            OID_SERVER => {
                match self.resource_value(&UriPath::resource(oid, iid, SERVER_RID_SSID)) {
                    Ok((ResourceValue::Int(ssid), _)) => (Some(ssid as u16), None),
                    _ => (None, None),
                }
            }
            OID_OSCORE => (self.oscore_instance_ssid(iid), None),
            _ => (None, None),
        }
    }

    /// SSID of a non-bootstrap Security instance.
    pub(crate) fn security_instance_ssid(&self, iid: Iid) -> Option<u16> {
        let bootstrap_path =
            UriPath::resource(OID_SECURITY, iid, SECURITY_RID_BOOTSTRAP_SERVER);
        match self.resource_value(&bootstrap_path) {
            Ok((ResourceValue::Bool(false), _)) => {}
            _ => return None,
        }
        match self.resource_value(&UriPath::resource(OID_SECURITY, iid, SECURITY_RID_SSID)) {
            Ok((ResourceValue::Int(ssid), _)) => Some(ssid as u16),
            _ => None,
        }
    }

    /// SSID of the Security instance whose OSCORE link points at `iid`.
    fn oscore_instance_ssid(&self, iid: Iid) -> Option<u16> {
        let security = self.registry.find(OID_SECURITY)?;
        for inst in security.instances() {
            let link = UriPath::resource(OID_SECURITY, inst.iid(), SECURITY_RID_OSCORE);
            if let Ok((ResourceValue::ObjLnk(link), _)) = self.resource_value(&link) {
                if link.oid == OID_OSCORE && link.iid == iid {
                    return self.security_instance_ssid(inst.iid());
                }
            }
        }
        None
    }
}

fn bump_res_level(iter: &mut IterCtx, res_count: usize) {
    iter.res_idx += 1;
    if iter.res_idx == res_count {
        iter.res_idx = 0;
        iter.inst_idx += 1;
        iter.level = Some(PathLevel::Instance);
    }
}
