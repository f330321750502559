//! Solidity interfaces for the native-yield contracts: the YieldManager,
//! the L1 message service yield extension, and the Lido V3 vault stack
//! (LazyOracle, VaultHub, Dashboard, StakingVault).

use alloy::sol;

sol!(
    #![sol(all_derives = true, rpc)]
    interface IYieldManager {
        struct YieldProviderData {
            uint8 yieldProviderVendor;
            bool isStakingPaused;
            bool isOssificationInitiated;
            bool isOssified;
            address primaryEntrypoint;
            address ossifiedEntrypoint;
            uint96 yieldProviderIndex;
            uint256 userFunds;
            uint256 yieldReportedCumulative;
            uint256 lstLiabilityPrincipal;
            uint256 lastReportedNegativeYield;
        }

        function L1_MESSAGE_SERVICE() external view returns (address);
        function getTotalSystemBalance() external view returns (uint256);
        function getEffectiveTargetWithdrawalReserve() external view returns (uint256);
        function getTargetReserveDeficit() external view returns (uint256);
        function userFunds(address _yieldProvider) external view returns (uint256);
        function isStakingPaused(address _yieldProvider) external view returns (bool);
        function isOssificationInitiated(address _yieldProvider) external view returns (bool);
        function isOssified(address _yieldProvider) external view returns (bool);
        function getYieldProviderData(address _yieldProvider)
            external
            view
            returns (YieldProviderData memory);

        function withdrawableValue(address _yieldProvider) external returns (uint256);
        function fundYieldProvider(address _yieldProvider, uint256 _amount) external;
        function safeAddToWithdrawalReserve(address _yieldProvider, uint256 _amount) external;
        function safeWithdrawFromYieldProvider(address _yieldProvider, uint256 _amount) external;
        function pauseStaking(address _yieldProvider) external;
        function unpauseStaking(address _yieldProvider) external;
        function unstake(address _yieldProvider, bytes calldata _withdrawalParams) external payable;
        function reportYield(address _yieldProvider, address _l2YieldRecipient)
            external
            returns (uint256 newReportedYield, uint256 outstandingNegativeYield);
    }
);

sol!(
    #![sol(all_derives = true, rpc)]
    interface ILineaRollupYieldExtension {
        function transferFundsForNativeYield(uint256 _amount) external;
    }
);

sol!(
    #![sol(all_derives = true, rpc)]
    interface ILazyOracle {
        event VaultsReportDataUpdated(
            uint256 indexed timestamp,
            uint256 indexed refSlot,
            bytes32 indexed root,
            string cid
        );

        function latestReportData()
            external
            view
            returns (uint256 timestamp, uint256 refSlot, bytes32 treeRoot, string memory reportCid);

        function updateVaultData(
            address _vault,
            uint256 _totalValue,
            uint256 _cumulativeLidoFees,
            uint256 _liabilityShares,
            uint256 _maxLiabilityShares,
            uint256 _slashingReserve,
            bytes32[] calldata _proof
        ) external;
    }
);

sol!(
    #![sol(all_derives = true, rpc)]
    interface IVaultHub {
        function isReportFresh(address _vault) external view returns (bool);
        function settleableLidoFeesValue(address _vault) external view returns (uint256);
    }
);

sol!(
    #![sol(all_derives = true, rpc)]
    interface IDashboard {
        function totalValue() external view returns (uint256);
    }
);

sol!(
    #![sol(all_derives = true, rpc)]
    interface IStakingVault {
        function calculateValidatorWithdrawalFee(uint256 _numberOfKeys)
            external
            view
            returns (uint256);
    }
);

sol! {
    /// Parameters for `IYieldManager::unstake`, ABI-encoded into its
    /// `_withdrawalParams` argument.
    #[derive(Debug, PartialEq, Eq)]
    struct WithdrawalParams {
        bytes[] pubkeys;
        uint64[] amounts;
        address refundRecipient;
    }
}
