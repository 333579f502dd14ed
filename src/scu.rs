//
// scu.rs
// dcmsort
//
// Native DICOM upper-layer transport: C-ECHO preflight and per-file C-STORE.
//

use std::path::Path;

use anyhow::{bail, Context, Result};
use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::object::{open_file, InMemDicomObject};
use dicom_ul::association::client::ClientAssociationOptions;
use dicom_ul::pdu::{PDataValue, PDataValueType, Pdu, PresentationContextResultReason};
use tracing::{debug, warn};

use crate::config::PacsNode;
use crate::send::{SendError, Sender};
use crate::transcode::is_uncompressed_ts;

use dicom::encoding::TransferSyntaxIndex;
use dicom::transfer_syntax::TransferSyntaxRegistry;

const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
const VERIFICATION_SOP_CLASS: &str = "1.2.840.10008.1.1";

/// Sender that speaks the DICOM upper layer directly instead of shelling out
/// to an external toolkit.
pub struct NativeScu {
    calling_ae: String,
}

impl NativeScu {
    pub fn new(calling_ae: &str) -> Self {
        NativeScu {
            calling_ae: calling_ae.to_string(),
        }
    }

    /// C-ECHO against the node: proves the peer is reachable and accepts our
    /// AE titles before any store is attempted.
    pub fn echo(&self, node: &PacsNode) -> Result<()> {
        let addr = node.socket_addr();
        let mut association = ClientAssociationOptions::new()
            .calling_ae_title(self.calling_ae.as_str())
            .called_ae_title(node.ae_title.as_str())
            .with_abstract_syntax(VERIFICATION_SOP_CLASS)
            .establish(addr.as_str())
            .with_context(|| format!("Failed to establish association with {}", node))?;

        let pc_id = association
            .presentation_contexts()
            .iter()
            .find(|pc| pc.reason == PresentationContextResultReason::Acceptance)
            .map(|pc| pc.id)
            .context("No accepted presentation context for verification")?;

        let mut cmd = InMemDicomObject::new_empty();
        cmd.put(DataElement::new(
            Tag(0x0000, 0x0002),
            VR::UI,
            PrimitiveValue::from(VERIFICATION_SOP_CLASS),
        ));
        cmd.put(DataElement::new(
            Tag(0x0000, 0x0100),
            VR::US,
            PrimitiveValue::from(0x0030_u16),
        )); // C-ECHO-RQ
        cmd.put(DataElement::new(
            Tag(0x0000, 0x0110),
            VR::US,
            PrimitiveValue::from(1_u16),
        ));
        cmd.put(DataElement::new(
            Tag(0x0000, 0x0800),
            VR::US,
            PrimitiveValue::from(0x0101_u16),
        )); // no data set

        let command_bytes = encode_command(&cmd)?;
        association
            .send(&Pdu::PData {
                data: vec![PDataValue {
                    presentation_context_id: pc_id,
                    value_type: PDataValueType::Command,
                    is_last: true,
                    data: command_bytes,
                }],
            })
            .context("Failed to send C-ECHO-RQ")?;

        let rsp = association.receive().context("Failed to receive C-ECHO-RSP")?;
        let status = response_status(&rsp)?;
        let _ = association.release();
        if status != 0 {
            bail!("C-ECHO failed with status 0x{:04X}", status);
        }
        debug!("C-ECHO to {} succeeded", node);
        Ok(())
    }

    fn store(&self, file: &Path, node: &PacsNode) -> Result<()> {
        let obj = open_file(file).context("Failed to open DICOM file")?;
        let sop_class = obj
            .element(Tag(0x0008, 0x0016))
            .context("Missing SOP Class UID")?
            .to_str()?
            .trim()
            .to_string();
        let sop_instance = obj
            .element(Tag(0x0008, 0x0018))
            .context("Missing SOP Instance UID")?
            .to_str()?
            .trim()
            .to_string();
        let file_ts = obj.meta().transfer_syntax().trim_end_matches('\0').to_string();

        let addr = node.socket_addr();
        let mut association = ClientAssociationOptions::new()
            .calling_ae_title(self.calling_ae.as_str())
            .called_ae_title(node.ae_title.as_str())
            .with_abstract_syntax(sop_class.clone())
            .establish(addr.as_str())
            .with_context(|| format!("Failed to establish association with {}", node))?;

        let pc_id = association
            .presentation_contexts()
            .iter()
            .find(|pc| pc.reason == PresentationContextResultReason::Acceptance)
            .map(|pc| pc.id)
            .context("No accepted presentation context for the file's SOP class")?;
        let negotiated_ts = association
            .presentation_contexts()
            .iter()
            .find(|pc| pc.id == pc_id)
            .map(|pc| pc.transfer_syntax.trim_end_matches('\0').to_string())
            .context("Accepted presentation context disappeared")?;

        // The data set must be written in the negotiated transfer syntax.
        // Re-encoding between uncompressed syntaxes is fine; re-encoding
        // encapsulated pixel data is not something this transport does.
        if negotiated_ts != file_ts && !is_uncompressed_ts(&file_ts) {
            bail!(
                "Peer negotiated {} but the file is stored as {}; decompress it first or use the dcmsend transport",
                negotiated_ts,
                file_ts
            );
        }

        let ts = TransferSyntaxRegistry.get(&negotiated_ts).with_context(|| {
            format!("Negotiated transfer syntax {} not found", negotiated_ts)
        })?;
        let mut data_bytes = Vec::new();
        obj.write_dataset_with_ts(&mut data_bytes, ts)
            .context("Failed to encode data set")?;

        let mut cmd = InMemDicomObject::new_empty();
        cmd.put(DataElement::new(
            Tag(0x0000, 0x0002),
            VR::UI,
            PrimitiveValue::from(sop_class),
        ));
        cmd.put(DataElement::new(
            Tag(0x0000, 0x0100),
            VR::US,
            PrimitiveValue::from(0x0001_u16),
        )); // C-STORE-RQ
        cmd.put(DataElement::new(
            Tag(0x0000, 0x0110),
            VR::US,
            PrimitiveValue::from(1_u16),
        ));
        cmd.put(DataElement::new(
            Tag(0x0000, 0x0700),
            VR::US,
            PrimitiveValue::from(0x0000_u16),
        )); // medium priority
        cmd.put(DataElement::new(
            Tag(0x0000, 0x0800),
            VR::US,
            PrimitiveValue::from(0x0000_u16),
        )); // data set follows
        cmd.put(DataElement::new(
            Tag(0x0000, 0x1000),
            VR::UI,
            PrimitiveValue::from(sop_instance),
        ));
        let command_bytes = encode_command(&cmd)?;

        association
            .send(&Pdu::PData {
                data: vec![PDataValue {
                    presentation_context_id: pc_id,
                    value_type: PDataValueType::Command,
                    is_last: true,
                    data: command_bytes,
                }],
            })
            .context("Failed to send C-STORE-RQ")?;
        association
            .send(&Pdu::PData {
                data: vec![PDataValue {
                    presentation_context_id: pc_id,
                    value_type: PDataValueType::Data,
                    is_last: true,
                    data: data_bytes,
                }],
            })
            .context("Failed to send data set")?;

        let rsp = association.receive().context("Failed to receive C-STORE-RSP")?;
        let status = response_status(&rsp)?;
        let _ = association.release();
        match status {
            0x0000 => Ok(()),
            0xB000..=0xBFFF => {
                warn!(
                    "C-STORE of {:?} accepted with warning status 0x{:04X}",
                    file, status
                );
                Ok(())
            }
            other => bail!("C-STORE rejected with status 0x{:04X}", other),
        }
    }
}

impl Sender for NativeScu {
    fn name(&self) -> &'static str {
        "native"
    }

    fn preflight(&self, node: &PacsNode) -> Result<(), SendError> {
        Ok(self.echo(node)?)
    }

    fn send(&self, file: &Path, node: &PacsNode) -> Result<(), SendError> {
        Ok(self.store(file, node)?)
    }
}

/// Encode a command set as Implicit VR LE, prefixed with the group length
/// element the DIMSE layer requires, which means encoding twice.
fn encode_command(cmd: &InMemDicomObject) -> Result<Vec<u8>> {
    let ts = TransferSyntaxRegistry
        .get(IMPLICIT_VR_LE)
        .context("Implicit VR Little Endian transfer syntax not found")?;

    let mut body = Vec::new();
    cmd.write_dataset_with_ts(&mut body, ts)
        .context("Failed to encode command set")?;

    let mut with_length = cmd.clone();
    with_length.put(DataElement::new(
        Tag(0x0000, 0x0000),
        VR::UL,
        PrimitiveValue::from(body.len() as u32),
    ));
    let mut out = Vec::new();
    with_length
        .write_dataset_with_ts(&mut out, ts)
        .context("Failed to encode command set")?;
    Ok(out)
}

/// Pull the DIMSE status out of a response PDU.
fn response_status(pdu: &Pdu) -> Result<u16> {
    let Pdu::PData { data } = pdu else {
        bail!("Unexpected response PDU: {:?}", pdu);
    };
    let pdv = data
        .iter()
        .find(|pdv| matches!(pdv.value_type, PDataValueType::Command))
        .context("Response carried no command set")?;
    let ts = TransferSyntaxRegistry
        .get(IMPLICIT_VR_LE)
        .context("Implicit VR Little Endian transfer syntax not found")?;
    let rsp = InMemDicomObject::read_dataset_with_ts(&pdv.data[..], ts)
        .context("Failed to decode response command set")?;
    rsp.element(Tag(0x0000, 0x0900))
        .context("Response carried no status")?
        .to_int::<u16>()
        .context("Malformed response status")
}
