//! Fee plug call encoding

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall};

sol! {
    /// Pays `amount` of `feeToken` held by the fee plug to `receiver`
    function distributeFee(address feeToken, uint256 amount, address receiver);
}

/// ABI-encoded `distributeFee` call, selector included
pub fn distribute_fee_payload(token: Address, amount: U256, receiver: Address) -> Bytes {
    let call = distributeFeeCall {
        feeToken: token,
        amount,
        receiver,
    };
    Bytes::from(call.abi_encode())
}
