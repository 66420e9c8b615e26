//! Generated contract bindings.

use ethers::prelude::abigen;

abigen!(
    FixedProductMarketMaker,
    r#"[
        function calcBuyAmount(uint256 investmentAmount, uint256 outcomeIndex) external view returns (uint256)
        function buy(uint256 investmentAmount, uint256 outcomeIndex, uint256 minOutcomeTokensToBuy) external
        function collateralToken() external view returns (address)
    ]"#
);

abigen!(
    ConditionalTokens,
    r#"[
        function getCollectionId(bytes32 parentCollectionId, bytes32 conditionId, uint256 indexSet) external view returns (bytes32)
        function getPositionId(address collateralToken, bytes32 collectionId) external pure returns (uint256)
        function balanceOf(address owner, uint256 positionId) external view returns (uint256)
        function payoutNumerators(bytes32 conditionId, uint256 index) external view returns (uint256)
        function redeemPositions(address collateralToken, bytes32 parentCollectionId, bytes32 conditionId, uint256[] indexSets) external
    ]"#
);

abigen!(
    Erc20,
    r#"[
        function approve(address spender, uint256 amount) external returns (bool)
        function allowance(address owner, address spender) external view returns (uint256)
        function balanceOf(address account) external view returns (uint256)
    ]"#
);

abigen!(
    GnosisSafe,
    r#"[
        function getOwners() external view returns (address[])
        function nonce() external view returns (uint256)
        function getTransactionHash(address to, uint256 value, bytes data, uint8 operation, uint256 safeTxGas, uint256 baseGas, uint256 gasPrice, address gasToken, address refundReceiver, uint256 nonce) external view returns (bytes32)
        function execTransaction(address to, uint256 value, bytes data, uint8 operation, uint256 safeTxGas, uint256 baseGas, uint256 gasPrice, address gasToken, address refundReceiver, bytes signatures) external payable returns (bool)
    ]"#
);
