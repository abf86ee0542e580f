use crate::error::InferError;
use crate::infer_context::InferContext;
use crate::operation::Operation;
use crate::ops::{InferSymbolicShape, operand_shape, results};
use crate::shape_or_data::ShapeOrData;
use crate::sym_expr::DimExpr;

/// Specifies how a convolution's padding is determined.
///
/// This is derived from the `padding_algorithm` operator attribute.
#[derive(Copy, Clone, Debug, PartialEq)]
enum PaddingAlgorithm {
    /// Use the padding from the `paddings` attribute.
    Explicit,

    /// Pad the input so that the size of each output spatial dimension is
    /// `ceil(input_size / stride)`. Dilation is ignored.
    Same,

    /// No padding.
    Valid,
}

impl PaddingAlgorithm {
    fn from_attr(name: &str) -> Self {
        match name {
            "SAME" => Self::Same,
            "VALID" => Self::Valid,
            _ => Self::Explicit,
        }
    }
}

/// Expand a padding attribute to `[start_0, end_0, start_1, end_1, ...]`
/// form. A list with one entry per spatial dim uses the same padding at the
/// start and end of each dim.
fn expand_paddings(paddings: &[i64], spatial_dims: usize) -> Result<Vec<DimExpr>, InferError> {
    if paddings.len() == spatial_dims {
        Ok(paddings
            .iter()
            .flat_map(|&pad| [DimExpr::Value(pad), DimExpr::Value(pad)])
            .collect())
    } else if paddings.len() == spatial_dims * 2 {
        Ok(paddings.iter().map(|&pad| DimExpr::Value(pad)).collect())
    } else {
        Err(InferError::invalid_argument(format!(
            "paddings should have {} or {} entries but has {}",
            spatial_dims,
            spatial_dims * 2,
            paddings.len()
        )))
    }
}

/// Replace the explicit paddings and dilations according to the padding
/// algorithm.
fn update_padding_and_dilation(
    algorithm: PaddingAlgorithm,
    paddings: &mut [DimExpr],
    dilations: &mut [DimExpr],
    in_sizes: &[DimExpr],
    strides: &[i64],
    kernel_sizes: &[DimExpr],
) {
    match algorithm {
        PaddingAlgorithm::Explicit => {}
        PaddingAlgorithm::Valid => paddings.fill(DimExpr::Value(0)),
        PaddingAlgorithm::Same => {
            let one = DimExpr::Value(1);
            for (i, in_size) in in_sizes.iter().enumerate() {
                let stride = DimExpr::Value(strides[i]);
                let out_size = (in_size.clone() + stride.clone() - one.clone()) / stride.clone();
                let pad_sum = ((out_size - one.clone()) * stride + kernel_sizes[i].clone()
                    - in_size.clone())
                .max(&DimExpr::Value(0));
                let pad_start = pad_sum.clone() / DimExpr::Value(2);
                let pad_end = pad_sum - pad_start.clone();

                paddings[i * 2] = pad_start;
                paddings[i * 2 + 1] = pad_end;
                dilations[i] = one.clone();
            }
        }
    }
}

/// Return the output size for a spatial dimension in a convolution.
fn output_size(
    in_size: &DimExpr,
    kernel_size: &DimExpr,
    stride: i64,
    dilation: &DimExpr,
    pad_start: &DimExpr,
    pad_end: &DimExpr,
) -> DimExpr {
    let one = DimExpr::Value(1);
    let dilated_kernel = dilation.clone() * (kernel_size.clone() - one.clone()) + one.clone();
    (in_size.clone() + pad_start.clone() + pad_end.clone() - dilated_kernel)
        / DimExpr::Value(stride)
        + one
}

/// Read an attribute with one entry per spatial dim, defaulting to `default`
/// for each dim.
fn spatial_attr(
    op: &Operation,
    name: &str,
    spatial_dims: usize,
    default: i64,
) -> Result<Vec<i64>, InferError> {
    let values = op.attr_ints_or(name, &vec![default; spatial_dims])?;
    if values.len() < spatial_dims {
        return Err(InferError::invalid_argument(format!(
            "{} should have {} entries but has {}",
            name,
            spatial_dims,
            values.len()
        )));
    }
    Ok(values)
}

/// Conv2D and Conv3D operators.
///
/// The input is `[N, C, *spatial]`, or `[N, *spatial, C]` if `data_format`
/// is `NHWC` or `NDHWC`. The filter is `[C_out, C_in, *kernel]`, or
/// `[C_out, *kernel, C_in]` for channel-last inputs when
/// [`InferConfig::filter_channel_last`](crate::InferConfig::filter_channel_last)
/// is set. The output uses the same layout as the input.
pub struct Conv;

impl InferSymbolicShape for Conv {
    fn infer_symbolic_shape(
        &self,
        op: &Operation,
        ctx: &mut InferContext,
    ) -> Result<(), InferError> {
        let input = operand_shape(op, ctx, 0)?;
        let filter = operand_shape(op, ctx, 1)?;
        let [out] = results(op)?;

        if input.len() < 3 {
            return Err(InferError::invalid_argument(format!(
                "conv input should have rank >= 3 but has rank {}",
                input.len()
            )));
        }

        // First dim of filter and input have a different meaning (output
        // channels and batch size respectively), but the ranks should always
        // be equal.
        if filter.len() != input.len() {
            return Err(InferError::invalid_argument(format!(
                "conv filter should have rank {} but has rank {}",
                input.len(),
                filter.len()
            )));
        }

        let ndim = input.len();
        let spatial_dims = ndim - 2;
        let data_format = op.attr_str_or("data_format", "NCHW")?;
        let channel_last = matches!(data_format, "NHWC" | "NDHWC");
        let algorithm =
            PaddingAlgorithm::from_attr(op.attr_str_or("padding_algorithm", "EXPLICIT")?);

        let strides = spatial_attr(op, "strides", spatial_dims, 1)?;
        if let Some(stride) = strides.iter().find(|&&s| s <= 0) {
            return Err(InferError::invalid_argument(format!(
                "strides must be positive but got {}",
                stride
            )));
        }
        let mut dilations: Vec<DimExpr> = spatial_attr(op, "dilations", spatial_dims, 1)?
            .into_iter()
            .map(DimExpr::Value)
            .collect();
        let mut paddings =
            expand_paddings(&op.attr_ints_or("paddings", &vec![0; spatial_dims])?, spatial_dims)?;

        let in_sizes = if channel_last {
            &input[1..ndim - 1]
        } else {
            &input[2..]
        };
        let kernel_sizes = if channel_last && ctx.config().filter_channel_last {
            &filter[1..ndim - 1]
        } else {
            &filter[2..]
        };

        update_padding_and_dilation(
            algorithm,
            &mut paddings,
            &mut dilations,
            in_sizes,
            &strides,
            kernel_sizes,
        );

        let mut out_shape = Vec::with_capacity(ndim);
        out_shape.push(input[0].clone());
        if !channel_last {
            out_shape.push(filter[0].clone());
        }
        for (i, (in_size, kernel_size)) in in_sizes.iter().zip(kernel_sizes).enumerate() {
            out_shape.push(output_size(
                in_size,
                kernel_size,
                strides[i],
                &dilations[i],
                &paddings[i * 2],
                &paddings[i * 2 + 1],
            ));
        }
        if channel_last {
            out_shape.push(filter[0].clone());
        }

        ctx.set_shape_or_data(out, ShapeOrData::from_shape(out_shape))
    }
}
