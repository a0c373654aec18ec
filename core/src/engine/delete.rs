//! Delete and Bootstrap-Delete.
//!
//! A regular Delete removes one Instance or one Resource-Instance. A
//! Bootstrap-Delete sweeps everything its path matches, never touches the
//! Device object, and protects the bootstrap-server account: its Security
//! instance and any OSCORE instance it links are skipped under wildcards
//! and rejected when targeted directly.

use lwm2m_shared::value::ResourceValue;
use lwm2m_shared::{
    DmError, Iid, PathLevel, Result, Riid, UriPath, OID_DEVICE, OID_OSCORE, OID_SECURITY,
    SECURITY_RID_BOOTSTRAP_SERVER, SECURITY_RID_OSCORE,
};

use crate::registry::EntityIndices;

use super::DataModel;

impl DataModel {
    pub(crate) fn begin_delete(&mut self, path: &UriPath) -> Result<()> {
        self.op.transactional = true;

        if self.op.bootstrap {
            let swept = self.bootstrap_delete(path);
            return self.latch(swept);
        }

        if !path.is(PathLevel::Instance) && !path.is(PathLevel::ResourceInstance) {
            log::error!("delete can't target {}", path);
            return Err(self.fail(DmError::InputArg));
        }
        let Some(oid) = path.oid() else {
            return Err(self.fail(DmError::InputArg));
        };
        let located = self.locate_and_begin(oid);
        let obj_idx = self.latch(located)?;
        let located = self.registry.locate_within(obj_idx, path);
        let entity = self.latch(located)?;
        self.op.entity = Some(entity);

        let deleted = if path.is(PathLevel::Instance) {
            self.delete_instance_at(&entity)
        } else {
            match path.riid() {
                Some(riid) => self.delete_res_instance_at(&entity, riid),
                None => Err(DmError::InputArg),
            }
        };
        self.latch(deleted)
    }

    /// Unlinks one Instance, letting the object veto through its hook.
    pub(crate) fn delete_instance_at(&mut self, entity: &EntityIndices) -> Result<()> {
        let obj = self.registry.object_at(entity);
        let oid = obj.oid();
        let inst_idx = entity.inst.ok_or(DmError::Logic)?;
        let iid = obj
            .instances()
            .get(inst_idx)
            .ok_or(DmError::Logic)?
            .iid();
        if let Some(handlers) = obj.handlers() {
            handlers.instance_deleted(oid, iid).map_err(|err| {
                log::error!("instance delete of /{}/{} failed: {}", oid, iid, err);
                err
            })?;
        }
        self.registry.object_at_mut(entity).remove_instance(iid)?;
        Ok(())
    }

    /// Unlinks one Resource-Instance, letting the resource veto through
    /// its hook.
    pub(crate) fn delete_res_instance_at(
        &mut self,
        entity: &EntityIndices,
        riid: Riid,
    ) -> Result<()> {
        let res = self.registry.resource_at(entity).ok_or(DmError::Logic)?;
        let obj = self.registry.object_at(entity);
        let inst = self.registry.instance_at(entity).ok_or(DmError::Logic)?;
        if let Some(hook) = res.hooks().and_then(|hooks| hooks.instance_deleted.clone()) {
            let rref = crate::model::ResRef {
                oid: obj.oid(),
                iid: inst.iid(),
                rid: res.rid(),
                riid: Some(riid),
            };
            hook(&rref).map_err(|err| {
                log::error!("resource-instance delete failed: {}", err);
                err
            })?;
        }
        let multi = self
            .registry
            .resource_at_mut(entity)
            .and_then(|res| res.as_multi_mut())
            .ok_or(DmError::Logic)?;
        multi.remove(riid)?;
        Ok(())
    }

    fn bootstrap_delete(&mut self, path: &UriPath) -> Result<()> {
        if path.has(PathLevel::Resource) {
            log::error!("bootstrap delete can't target {}", path);
            return Err(DmError::InputArg);
        }
        let all_objects = !path.has(PathLevel::Object);
        let all_instances = !path.has(PathLevel::Instance);

        if !all_objects && path.oid() == Some(OID_DEVICE) {
            log::error!("the Device object instance cannot be deleted");
            return Err(DmError::BadRequest);
        }

        for obj_idx in 0..self.registry.len() {
            let oid = self.registry.objects()[obj_idx].oid();
            if oid == OID_DEVICE {
                continue;
            }
            if !all_objects && path.oid() != Some(oid) {
                continue;
            }
            self.call_operation_begin(obj_idx)?;
            for inst_idx in (0..self.registry.objects()[obj_idx].instance_count()).rev() {
                let iid = self.registry.objects()[obj_idx].instances()[inst_idx].iid();
                if !all_instances && path.iid() != Some(iid) {
                    continue;
                }
                if self.is_bootstrap_instance(oid, iid)? {
                    if !all_objects && !all_instances {
                        log::error!(
                            "path points at the bootstrap-server account instance \
                             or its OSCORE instance; neither can be deleted"
                        );
                        return Err(DmError::BadRequest);
                    }
                    continue;
                }
                let entity = EntityIndices {
                    obj: obj_idx,
                    inst: Some(inst_idx),
                    res: None,
                    res_inst: None,
                };
                self.delete_instance_at(&entity)?;
            }
        }
        Ok(())
    }

    /// True for the Security instance with Bootstrap-Server set, and for
    /// the OSCORE instance that Security instance links.
    fn is_bootstrap_instance(&mut self, oid: u16, iid: Iid) -> Result<bool> {
        if oid == OID_SECURITY {
            let flag = UriPath::resource(OID_SECURITY, iid, SECURITY_RID_BOOTSTRAP_SERVER);
            return Ok(matches!(
                self.resource_value(&flag),
                Ok((ResourceValue::Bool(true), _))
            ));
        }
        if oid == OID_OSCORE {
            return self.is_oscore_bootstrap_instance(iid);
        }
        Ok(false)
    }

    fn is_oscore_bootstrap_instance(&mut self, iid: Iid) -> Result<bool> {
        let Some(sec_idx) = self.registry.position(OID_SECURITY) else {
            return Ok(false);
        };
        // The Security object joins the transaction for these reads.
        self.call_operation_begin(sec_idx)?;
        let sec_iids: Vec<Iid> = self.registry.objects()[sec_idx]
            .instances()
            .iter()
            .map(|inst| inst.iid())
            .collect();
        for sec_iid in sec_iids {
            let flag = UriPath::resource(OID_SECURITY, sec_iid, SECURITY_RID_BOOTSTRAP_SERVER);
            if !matches!(
                self.resource_value(&flag),
                Ok((ResourceValue::Bool(true), _))
            ) {
                continue;
            }
            let link = UriPath::resource(OID_SECURITY, sec_iid, SECURITY_RID_OSCORE);
            if let Ok((ResourceValue::ObjLnk(link), _)) = self.resource_value(&link) {
                if link.iid == iid {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}
