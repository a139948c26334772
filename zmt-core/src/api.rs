//! Typed calls for application tasks.
//!
//! Thin wrappers over [`RpcClient::call`] and
//! [`RpcClient::call_with_response`] that build the request body.

use crate::message::{
    AddrReqType, AfDataRequest, ConfigReadReq, ConfigReadRsp, ConfigWriteReq, EndpointDescriptor,
    IeeeAddrReq, NwkAddrReq, NwkInfo, PermitJoinReq, Request, TxPowerRsp, VersionInfo,
    ZdoDescReq,
};
use crate::rpc::RpcClient;
use zmt_protocol::Status;

impl RpcClient {
    pub async fn sys_reset(&self, new_nwk_state: bool) -> Status {
        self.call(Request::SysReset { new_nwk_state }).await
    }

    pub async fn sys_version(&self, version: &mut VersionInfo) -> Status {
        self.call_with_response(Request::SysVersion, version).await
    }

    pub async fn sys_nwk_info_read(&self, info: &mut NwkInfo) -> Status {
        self.call_with_response(Request::SysNwkInfoRead, info).await
    }

    pub async fn sys_config_read(&self, req: ConfigReadReq, rsp: &mut ConfigReadRsp) -> Status {
        self.call_with_response(Request::SysConfigRead(req), rsp).await
    }

    pub async fn sys_config_write(&self, req: ConfigWriteReq) -> Status {
        self.call(Request::SysConfigWrite(req)).await
    }

    /// Returns the status and writes the power the radio accepted.
    pub async fn sys_set_tx_power(&self, dbm: i8, applied: &mut i8) -> Status {
        let mut rsp = TxPowerRsp::default();
        let status = self
            .call_with_response(Request::SysSetTxPower { dbm }, &mut rsp)
            .await;
        if status.is_success() {
            *applied = rsp.applied_dbm;
        }
        status
    }

    pub async fn dev_start(&self, start_delay: u16) -> Status {
        self.call(Request::DevStart { start_delay }).await
    }

    /// Turns delivery of ZDO and device indications to this task on or off.
    pub async fn dev_zdo_callbacks(&self, enable: bool) -> Status {
        self.call(Request::DevZdoCallbacks { enable }).await
    }

    pub async fn af_register(&self, desc: EndpointDescriptor) -> Status {
        self.call(Request::AfRegister(desc)).await
    }

    pub async fn af_unregister(&self, endpoint: u8) -> Status {
        self.call(Request::AfUnregister { endpoint }).await
    }

    pub async fn af_data_request(&self, req: AfDataRequest) -> Status {
        self.call(Request::AfDataRequest(req)).await
    }

    pub async fn zdo_nwk_addr_req(
        &self,
        ieee_addr: [u8; 8],
        req_type: AddrReqType,
        start_index: u8,
    ) -> Status {
        self.call(Request::ZdoNwkAddr(NwkAddrReq {
            ieee_addr,
            req_type,
            start_index,
        }))
        .await
    }

    pub async fn zdo_ieee_addr_req(
        &self,
        nwk_addr: u16,
        req_type: AddrReqType,
        start_index: u8,
    ) -> Status {
        self.call(Request::ZdoIeeeAddr(IeeeAddrReq {
            nwk_addr,
            req_type,
            start_index,
        }))
        .await
    }

    pub async fn zdo_node_desc_req(&self, dst_addr: u16, nwk_addr_of_interest: u16) -> Status {
        self.call(Request::ZdoNodeDesc(ZdoDescReq {
            dst_addr,
            nwk_addr_of_interest,
        }))
        .await
    }

    pub async fn zdo_active_ep_req(&self, dst_addr: u16, nwk_addr_of_interest: u16) -> Status {
        self.call(Request::ZdoActiveEndpoint(ZdoDescReq {
            dst_addr,
            nwk_addr_of_interest,
        }))
        .await
    }

    pub async fn zdo_mgmt_permit_join_req(&self, dst_addr: u16, duration: u8) -> Status {
        self.call(Request::ZdoMgmtPermitJoin(PermitJoinReq {
            dst_addr,
            duration,
            tc_significance: true,
        }))
        .await
    }
}
